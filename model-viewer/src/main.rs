use model_viewer::engine::core::app_setup::create_app;
use model_viewer::engine::loading::config_loader::InitialSource;

#[cfg(not(target_arch = "wasm32"))]
use clap::Parser;

/// Command line options for the native viewer.
#[cfg(not(target_arch = "wasm32"))]
#[derive(Parser, Debug)]
#[command(name = "model-viewer", about = "View FBX, glTF, PLY and USDZ models")]
struct Args {
    /// Model URL or path to open at startup
    source: Option<String>,

    /// Viewer config, relative to the assets directory
    #[arg(long)]
    config: Option<String>,
}

fn main() {
    #[cfg(target_arch = "wasm32")]
    {
        let mut app = create_app(InitialSource::default());
        wasm_bindgen_futures::spawn_local(async move {
            app.run();
        });
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        let args = Args::parse();
        let mut app = create_app(InitialSource {
            source: args.source,
            config_path: args.config,
        });
        app.run();
    }
}
