pub mod test_masker;
