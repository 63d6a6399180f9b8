fn main() {
    uniffi::generate_scaffolding("src/pawlive.udl").unwrap();
}
