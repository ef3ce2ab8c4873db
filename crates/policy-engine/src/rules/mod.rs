pub mod network;
pub mod protected;
pub mod trusted;
