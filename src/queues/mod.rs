//! The three queue engines and their factories

pub mod mpsc;
pub mod spmc;
pub mod spsc;

pub use mpsc::{MpscConsumer, MpscCreationOptions, MpscProducer, MpscQueue};
pub use spmc::{SpmcConsumer, SpmcCreationOptions, SpmcProducer, SpmcQueue};
pub use spsc::{SpscConsumer, SpscCreationOptions, SpscProducer, SpscQueue};
