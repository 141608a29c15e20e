pub mod course;
pub mod page;
