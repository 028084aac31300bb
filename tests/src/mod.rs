#[cfg(test)]
pub mod health_api_tests;
#[cfg(test)]
pub mod listen_api_tests;
#[cfg(test)]
pub mod relay_api_tests;
#[cfg(test)]
pub mod utils;
#[cfg(test)]
pub mod wormhole_api_tests;
