pub mod patients;
pub mod tenant;
