pub fn execute(global: &crate::cli::GlobalFlags) -> anyhow::Result<()> {
    let config = global.load_config()?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
