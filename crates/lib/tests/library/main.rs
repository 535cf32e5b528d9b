mod common;

mod build_tests;
mod cache_tests;
mod limit_tests;
mod platform_tests;
mod resolve_tests;
