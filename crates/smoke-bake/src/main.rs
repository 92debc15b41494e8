mod scene;
mod stop;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use smoke3d::{
    BakeOutcome, Baker, CancelToken, FileSnapshotStore, SmokeSimulation, SnapshotFormat,
};

use scene::Scene;
use stop::StopFile;

/// smoke-bake - Bake smoke and fire scenes into a frame cache
#[derive(Parser, Debug)]
#[command(name = "smoke-bake", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate the base grids and write them to the data cache
    BakeData(BakeArgs),
    /// Synthesize noise detail on top of an existing data cache
    BakeNoise(BakeArgs),
    /// Data pass followed by the noise pass
    BakeAll(BakeArgs),
    /// Delete cached frames
    Free(FreeArgs),
}

#[derive(Args, Debug)]
struct CacheArgs {
    /// Cache directory
    #[arg(long, value_name = "DIR", default_value = "cache")]
    cache: PathBuf,

    /// Snapshot format (json, json.gz or raw)
    #[arg(long, default_value_t = SnapshotFormat::Raw)]
    format: SnapshotFormat,
}

#[derive(Args, Debug)]
struct BakeArgs {
    /// Scene file (.yaml, .yml or .json)
    #[arg(value_name = "SCENE")]
    scene: PathBuf,

    #[command(flatten)]
    cache: CacheArgs,

    /// First frame, defaults to the scene range
    #[arg(long)]
    start: Option<u32>,

    /// Last frame, defaults to the scene range
    #[arg(long)]
    end: Option<u32>,

    /// Creating this file stops the bake after the current frame
    /// [default: <cache>/stop]
    #[arg(long, value_name = "FILE")]
    stop_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct FreeArgs {
    #[command(flatten)]
    cache: CacheArgs,

    /// Only delete the noise cache
    #[arg(long)]
    noise_only: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Pass {
    Data,
    Noise,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::BakeData(args) => bake(&args, &[Pass::Data]),
        Command::BakeNoise(args) => bake(&args, &[Pass::Noise]),
        Command::BakeAll(args) => bake(&args, &[Pass::Data, Pass::Noise]),
        Command::Free(args) => {
            let baker = baker(&args.cache);
            if !args.noise_only {
                baker.free_data()?;
            }
            baker.free_noise()?;
            Ok(())
        }
    }
}

fn baker(args: &CacheArgs) -> Baker {
    Baker::new(FileSnapshotStore::new(&args.cache), args.format)
}

fn bake(args: &BakeArgs, passes: &[Pass]) -> Result<(), Box<dyn std::error::Error>> {
    let scene = Scene::load(&args.scene)?;
    let start = args.start.unwrap_or(scene.frames[0]);
    let end = args.end.unwrap_or(scene.frames[1]);

    let mut sim = SmokeSimulation::new(scene.config.clone())?;
    let dims = *sim.dims();
    if let Some(phi) = Scene::joined(&scene.obstacles, dims) {
        sim.set_static_obstacles(phi)?;
    }
    if let Some(phi) = Scene::joined(&scene.outflows, dims) {
        sim.set_static_outflow(phi)?;
    }
    if passes.contains(&Pass::Noise) && sim.noise().is_none() {
        return Err("scene has noise disabled".into());
    }

    let cancel = CancelToken::new();
    let stop_path = args
        .stop_file
        .clone()
        .unwrap_or_else(|| args.cache.cache.join("stop"));
    let stop = StopFile::arm(stop_path, cancel.clone())?;
    let baker = baker(&args.cache).with_cancel_token(cancel);
    log::info!(
        "baking {} frames {}..={} into {} ({})",
        args.scene.display(),
        start,
        end,
        args.cache.cache.display(),
        args.cache.format
    );

    for &pass in passes {
        let outcome = match pass {
            Pass::Data => baker.bake_data(&mut sim, start, end, |f| {
                stop.poll();
                scene.inputs_for(f)
            })?,
            Pass::Noise => baker.bake_noise(&mut sim, start, end, |f| {
                stop.poll();
                scene.inputs_for(f)
            })?,
        };
        match outcome {
            BakeOutcome::Completed { frames, elapsed } => {
                println!(
                    "{} pass: {} frames in {:.1}s",
                    if pass == Pass::Data { "data" } else { "noise" },
                    frames,
                    elapsed.as_secs_f64()
                );
            }
            BakeOutcome::Cancelled {
                last_completed_frame,
            } => {
                println!(
                    "cancelled after frame {:?}, remove {} and rerun to resume",
                    last_completed_frame,
                    stop.path().display()
                );
                break;
            }
        }
    }
    Ok(())
}
