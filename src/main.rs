fn main() {
    std::process::exit(clubget_lib::run())
}
