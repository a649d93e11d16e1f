use anyhow::Result;

fn main() -> Result<()> {
    nschannel::cli::run()
}
