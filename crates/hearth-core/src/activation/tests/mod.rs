#[cfg(test)]
mod router_tests;
#[cfg(test)]
mod trigger_tests;
