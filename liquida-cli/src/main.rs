use anyhow::Result;

fn main() -> Result<()> {
    liquida_cli::run_app()
}
