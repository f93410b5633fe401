mod audio;
mod capture;
mod error;
mod queue;
mod scope;
mod settings;
mod spectrum;
mod synth;
mod ui;

use audio::AudioSession;
use settings::{AppSettings, default_settings_path};
use ui::ScopeSynthApp;

fn main() -> eframe::Result<()> {
    env_logger::init();

    let settings_path = default_settings_path();
    let settings = AppSettings::load(&settings_path);

    let audio = AudioSession::new(settings.output_device.as_deref(), &settings).or_else(|err| {
        log::warn!("{err}; falling back to the default output");
        AudioSession::new(None, &settings)
    });
    if let Err(err) = &audio {
        log::error!("audio unavailable: {err}");
    }

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default().with_inner_size([820.0, 640.0]),
        ..Default::default()
    };
    eframe::run_native(
        "Scope Synth",
        options,
        Box::new(move |cc| Box::new(ScopeSynthApp::new(cc, audio, settings_path, settings))),
    )
}
