fn main() {
    if let Err(err) = osk_pilot_lib::run() {
        eprintln!("osk-pilot: {err:#}");
        std::process::exit(1);
    }
}
