//! Venue manager capability surface
//!
//! The vendor API is blocking and stateful. Everything above this module
//! talks to it through [`VenueSession`], obtained from a [`VenueConnector`].

pub mod codes;
pub mod group_descriptor;
pub mod simulated;
pub mod traits;

pub use codes::{classify, VenueCode};
pub use group_descriptor::GroupDescriptor;
pub use simulated::{SimulatedConnector, SimulatedVenue};
pub use traits::{ConnectParams, ManagerMode, VenueConnector, VenueResult, VenueSession};
