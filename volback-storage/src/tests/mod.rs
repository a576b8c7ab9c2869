mod local_tests;
mod transfer_tests;
