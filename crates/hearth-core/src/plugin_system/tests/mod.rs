pub mod runtime_tests;
