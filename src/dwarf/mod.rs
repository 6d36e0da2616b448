mod lines;

pub(crate) use lines::LineResolver;
