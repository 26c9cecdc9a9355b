pub mod jobs;
pub mod nodes;
pub mod scripts;
