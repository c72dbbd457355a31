//! Integration tests module

mod common;

mod integration {
    mod extraction_flow_tests;
    mod tracking_flow_tests;
}
