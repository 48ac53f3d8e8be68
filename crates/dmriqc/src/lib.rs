pub mod pipeline;
pub mod subjects;
