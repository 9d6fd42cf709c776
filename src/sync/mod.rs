pub mod cycle;
pub mod filter;
pub mod folders;
pub mod history;
pub mod identity;
pub mod supervisor;
