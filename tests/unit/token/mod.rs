pub mod test_rotation;
