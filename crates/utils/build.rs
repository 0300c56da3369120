use std::env;

fn main() {
    if let Err(err) = emit_git_variables() {
        println!("cargo:warning=vergen: {err}");
    }

    let version = env::var("VERSION").unwrap_or_else(|_| "latest".to_string());
    println!("cargo:rustc-env=CHARM_VERSION={version}");
}

fn emit_git_variables() -> anyhow::Result<()> {
    let mut builder = vergen_git2::Git2Builder::default();

    builder.sha(true);
    builder.dirty(true);

    let git2 = builder.build()?;

    vergen_git2::Emitter::default()
        .fail_on_error()
        .add_instructions(&git2)?
        .emit()
}
