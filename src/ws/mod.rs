pub mod presence_gateway;
pub mod rooms;
