pub mod adapt;
pub mod leaderboard;
pub mod provenance;
pub mod status;
pub mod submission;
