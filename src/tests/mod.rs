
mod single_flight;
