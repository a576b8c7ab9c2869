mod driver_tests;
mod metadata_tests;
mod naming_tests;
mod object_tests;
mod support;
