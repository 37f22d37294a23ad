// builders + plugins + higher level helpers
pub mod builders;
pub mod plugins;
pub mod utils;

#[cfg(feature = "test-utils")]
pub mod test_utils;
