pub mod account;
pub mod drawing;
pub mod leaderboard;

pub use account::{
    Account, AccountStatus, Accounts, GameStats, Profile, ProfileField, username_taken,
};
pub use drawing::{DrawingInfo, Drawings};
pub use leaderboard::{Leaderboard, LeaderboardEntry};
