use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let Some(model_file) = args.next() else {
        eprintln!("usage: scene-ngin <model.obj> [config-dir]");
        anyhow::bail!("no model file given");
    };
    let config_dir = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("config"));
    scene_ngin::run(&model_file, &config_dir)
}
