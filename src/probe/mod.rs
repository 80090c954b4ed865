pub mod correlate;
pub mod icmp;
pub mod interface;
pub mod socket;
