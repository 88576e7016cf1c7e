mod sequence;

pub(crate) use sequence::Sequence;
