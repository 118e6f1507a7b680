fn main() -> Result<(), Box<dyn std::error::Error>> {
    ctxzip::cli::run()
}
