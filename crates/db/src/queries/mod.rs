// crates/db/src/queries/mod.rs
// CRUD for the jobs and projects tables.

pub mod jobs;
mod projects;
