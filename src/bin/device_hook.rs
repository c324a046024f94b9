use anyhow::Result;

fn main() -> Result<()> {
    devhooks::cli::run(devhooks::cli::CliMode::Device)
}
