use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};

use reelcraft::api::Api;
use reelcraft::driver::SubtitleDate;
use reelcraft::GlobalConfig;

#[derive(Parser, Debug)]
#[command(name = "reelcraft", version)]
struct Cli {
    /// Global render parameters (width/height/fps/durations).
    #[arg(long, global = true, default_value = "config/global.yaml")]
    config: PathBuf,

    /// Directory of `<name>.yaml` template files.
    #[arg(long, global = true, default_value = "templates")]
    templates: PathBuf,

    /// Directory of incremental session state.
    #[arg(long, global = true, default_value = "sessions")]
    sessions: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// One-shot render: cover image plus 1..5 clips, directly to a muxed MP4.
    Render(RenderArgs),
    /// Start an incremental session with the cover image (segment 0).
    Init(InitArgs),
    /// Append one video clip to an existing session.
    Append(AppendArgs),
    /// Concatenate and mux a session's segments into the final MP4.
    Finalize(FinalizeArgs),
    /// Print a session's current metadata.
    Status(StatusArgs),
    /// List templates available under `--templates`.
    Templates,
}

#[derive(Parser, Debug)]
struct DateArgs {
    #[arg(long)]
    year: i32,
    #[arg(long)]
    month: u32,
    #[arg(long)]
    day: u32,
}

impl From<DateArgs> for SubtitleDate {
    fn from(d: DateArgs) -> Self {
        SubtitleDate { year: d.year, month: d.month, day: d.day }
    }
}

#[derive(Parser, Debug)]
struct RenderArgs {
    #[arg(long)]
    template: String,
    #[arg(long)]
    image: PathBuf,
    #[arg(long = "video", num_args = 1..=5)]
    videos: Vec<PathBuf>,
    #[command(flatten)]
    date: DateArgs,
    #[arg(long)]
    out: PathBuf,
}

#[derive(Parser, Debug)]
struct InitArgs {
    #[arg(long)]
    template: String,
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    date: DateArgs,
}

#[derive(Parser, Debug)]
struct AppendArgs {
    #[arg(long)]
    session: String,
    #[arg(long)]
    video: PathBuf,
}

#[derive(Parser, Debug)]
struct FinalizeArgs {
    #[arg(long)]
    session: String,
    /// Output file name within `--out-dir`; defaults to `<session_id>.mp4`.
    #[arg(long)]
    output: Option<String>,
    #[arg(long, default_value = "output")]
    out_dir: PathBuf,
}

#[derive(Parser, Debug)]
struct StatusArgs {
    #[arg(long)]
    session: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = GlobalConfig::load(&cli.config)
        .with_context(|| format!("load global config '{}'", cli.config.display()))?;
    let api = Api::new(config, &cli.templates, &cli.sessions);

    match cli.cmd {
        Command::Render(args) => cmd_render(&api, args),
        Command::Init(args) => cmd_init(&api, args),
        Command::Append(args) => cmd_append(&api, args),
        Command::Finalize(args) => cmd_finalize(&api, args),
        Command::Status(args) => cmd_status(&api, args),
        Command::Templates => cmd_templates(&api),
    }
}

fn cmd_render(api: &Api, args: RenderArgs) -> anyhow::Result<()> {
    let path = api.render_once(&args.template, &args.image, &args.videos, args.date.into(), &args.out)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_init(api: &Api, args: InitArgs) -> anyhow::Result<()> {
    let metadata = api.init_session(&args.template, &args.image, args.date.into())?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn cmd_append(api: &Api, args: AppendArgs) -> anyhow::Result<()> {
    let metadata = api.append_session(&args.session, &args.video)?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn cmd_finalize(api: &Api, args: FinalizeArgs) -> anyhow::Result<()> {
    let path = api.finalize_session(&args.session, args.output, &args.out_dir)?;
    println!("wrote {}", path.display());
    Ok(())
}

fn cmd_status(api: &Api, args: StatusArgs) -> anyhow::Result<()> {
    let metadata = api.session_status(&args.session)?;
    println!("{}", serde_json::to_string_pretty(&metadata)?);
    Ok(())
}

fn cmd_templates(api: &Api) -> anyhow::Result<()> {
    for t in api.list_templates()? {
        println!("{}\t{}", t.name, t.description);
    }
    Ok(())
}
