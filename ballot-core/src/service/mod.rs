pub mod publisher;
pub mod tally;
pub mod voting;

pub use publisher::EventPublisher;
pub use tally::tally;
pub use voting::VotingService;
