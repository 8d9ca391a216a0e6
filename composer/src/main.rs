use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use structopt::StructOpt;

use composer::texturing;

#[derive(StructOpt)]
#[structopt(about = "Multi-view mesh texturing")]
struct Opts {
    #[structopt(
        help = "Logging level",
        long,
        default_value = "info",
        global = true
    )]
    log_level: LevelFilter,
    #[structopt(subcommand)]
    command: Command,
}

#[derive(StructOpt)]
enum Command {
    SelectViews(texturing::SelectViewsParams),
    Texture(texturing::TextureParams),
}

fn main() {
    let opts = Opts::from_args();

    if let Err(err) = TermLogger::init(
        opts.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    ) {
        eprintln!("error: failed to initialize logger ({})", err);
    }

    let res = match &opts.command {
        Command::SelectViews(params) => {
            texturing::select_views_with_params(params)
        }
        Command::Texture(params) => texturing::texture_with_params(params),
    };

    if let Err(err) = res {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
