pub mod alerts;
pub mod departures;
pub mod service_period;
pub mod statistics;
pub mod termini;
