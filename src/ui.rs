use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Instant;

use egui::{self, Align2, Color32, ComboBox, FontId, Id, Rect, Rounding, Stroke};

use crate::audio::{AudioSession, list_output_device_names};
use crate::error::AudioError;
use crate::queue::BlockConsumer;
use crate::scope::ScopeView;
use crate::settings::{AppSettings, ThemeKind};
use crate::synth::NoteEvent;

const LOWEST_NOTE: u8 = 48; // C3
const HIGHEST_NOTE: u8 = 84; // C6
const KEY_ASPECT: f32 = 4.5;
const BLACK_KEY_WIDTH_RATIO: f32 = 0.6;
const BLACK_KEY_HEIGHT_RATIO: f32 = 0.62;
const KEYBOARD_VELOCITY: f32 = 0.8;
const ACCENT: Color32 = Color32::from_rgb(80, 200, 255);
const TRACE: Color32 = Color32::from_rgb(120, 255, 140);

/// Computer keys mapped onto one octave and a bit, starting at C.
const KEY_ROW: [egui::Key; 13] = [
    egui::Key::A,
    egui::Key::W,
    egui::Key::S,
    egui::Key::E,
    egui::Key::D,
    egui::Key::F,
    egui::Key::T,
    egui::Key::G,
    egui::Key::Y,
    egui::Key::H,
    egui::Key::U,
    egui::Key::J,
    egui::Key::K,
];

pub struct ScopeSynthApp {
    audio: Option<AudioSession>,
    scope: Option<ScopeView>,
    settings_path: PathBuf,
    settings: AppSettings,
    output_devices: Vec<String>,
    audio_error: Option<String>,
    input: NoteInput,
}

impl ScopeSynthApp {
    pub fn new(
        cc: &eframe::CreationContext<'_>,
        audio: Result<(AudioSession, BlockConsumer), AudioError>,
        settings_path: PathBuf,
        settings: AppSettings,
    ) -> Self {
        apply_theme(&cc.egui_ctx, settings.theme);
        let mut app = Self {
            audio: None,
            scope: None,
            settings_path,
            settings,
            output_devices: list_output_device_names(),
            audio_error: None,
            input: NoteInput::default(),
        };
        match audio {
            Ok((session, consumer)) => app.install(session, consumer),
            Err(err) => app.audio_error = Some(err.to_string()),
        }
        app
    }

    fn install(&mut self, session: AudioSession, consumer: BlockConsumer) {
        match ScopeView::new(consumer, self.settings.frames_per_second) {
            Ok(view) => self.scope = Some(view),
            Err(err) => {
                log::error!("scope unavailable: {err}");
                self.audio_error = Some(err.to_string());
            }
        }
        self.audio = Some(session);
    }

    fn switch_output_device(&mut self) -> Result<(), AudioError> {
        let target = self.settings.output_device.clone();
        // Release the current device first; some backends refuse a second stream.
        self.audio = None;
        self.scope = None;
        self.input.clear();
        let (session, consumer) = AudioSession::new(target.as_deref(), &self.settings)?;
        self.output_devices = list_output_device_names();
        self.install(session, consumer);
        self.audio_error = None;
        Ok(())
    }

    fn send_all(&self, events: Vec<NoteEvent>) {
        if let Some(audio) = &self.audio {
            for event in events {
                audio.send_note(event);
            }
        }
    }

    fn scope_controls(&mut self, ui: &mut egui::Ui) -> bool {
        let mut changed = false;
        changed |= ui
            .add(egui::Slider::new(&mut self.settings.trigger_level, -0.5..=0.5).text("Trigger level"))
            .changed();
        changed |= ui
            .add(egui::Slider::new(&mut self.settings.frames_per_second, 1..=120).text("Refresh (fps)"))
            .changed();
        changed |= ui
            .add(egui::Slider::new(&mut self.settings.master_gain, 0.0..=1.0).text("Master gain"))
            .changed();

        if changed {
            if let Some(audio) = &self.audio {
                audio.controls().set_trigger_level(self.settings.trigger_level);
                audio.controls().set_master_gain(self.settings.master_gain);
            }
            if let Some(scope) = &mut self.scope {
                if let Err(err) = scope.set_frames_per_second(self.settings.frames_per_second) {
                    log::warn!("{err}");
                }
            }
        }

        if let Some(audio) = &self.audio {
            ui.label(format!("{} @ {} Hz", audio.device_name, audio.sample_rate));
        }
        if let Some(scope) = &self.scope {
            let (queued, capacity) = scope.backlog();
            ui.label(format!(
                "Frames shown: {} · queued: {queued}/{capacity} · dropped captures: {}",
                scope.frames_shown(),
                scope.dropped()
            ));
        }
        changed
    }

    fn save_settings(&self) {
        if let Err(err) = self.settings.save(&self.settings_path) {
            log::warn!(
                "could not save settings to {}: {err}",
                self.settings_path.display()
            );
        }
    }
}

impl eframe::App for ScopeSynthApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if let Some(scope) = &mut self.scope {
            scope.tick(Instant::now());
            ctx.request_repaint_after(scope.frame_interval());
        }
        let mut notes = Vec::new();
        let keyboard_events = collect_keyboard_events(ctx);
        self.input.handle_keys(&keyboard_events, &mut notes);

        egui::CentralPanel::default().show(ctx, |ui| {
            let mut theme_changed = false;
            let mut device_changed = false;
            ui.horizontal(|ui| {
                ui.strong("Scope Synth");
                ui.label(format!("A–K to play · ←/→ octave ({:+})", self.input.octave_offset));
                ui.separator();
                theme_changed = theme_selector(ui, ctx, &mut self.settings);
                ui.separator();
                let active = self.audio.as_ref().map(|audio| audio.device_name.as_str());
                device_changed = output_selector(
                    ui,
                    &self.output_devices,
                    &mut self.settings.output_device,
                    active,
                );
            });
            ui.add_space(6.0);

            card(ui, "Oscilloscope & Spectrum", |ui| match &self.scope {
                Some(scope) => draw_scope(ui, scope),
                None => draw_placeholder(ui, "No audio stream"),
            });
            ui.add_space(8.0);

            let mut controls_changed = false;
            card(ui, "Scope", |ui| controls_changed = self.scope_controls(ui));
            ui.add_space(8.0);

            let mut piano = PianoInput::default();
            card(ui, "Keyboard", |ui| {
                piano = draw_piano(ui, ctx, &self.input.held, self.input.mouse_note)
            });
            self.input.apply_mouse(piano, &mut notes);

            if device_changed {
                // The new stream starts with no held notes.
                notes.clear();
                self.audio_error = None;
                if let Err(err) = self.switch_output_device() {
                    log::error!("switching output failed: {err}");
                    self.audio_error = Some(err.to_string());
                }
            }
            if theme_changed || device_changed || controls_changed {
                self.save_settings();
            }

            if let Some(err) = &self.audio_error {
                ui.colored_label(Color32::RED, format!("Audio: {err}"));
            }
        });
        self.send_all(notes);
    }
}

/// Notes held by the computer keyboard and the mouse.
#[derive(Default)]
struct NoteInput {
    held: BTreeSet<u8>,
    /// Note each keyboard key started, so a key-up releases it even after an
    /// octave shift.
    key_notes: HashMap<egui::Key, u8>,
    mouse_note: Option<u8>,
    octave_offset: i32,
}

impl NoteInput {
    fn press(&mut self, note: u8, out: &mut Vec<NoteEvent>) {
        if self.held.insert(note) {
            out.push(NoteEvent::NoteOn {
                note,
                velocity: KEYBOARD_VELOCITY,
            });
        }
    }

    fn release(&mut self, note: u8, out: &mut Vec<NoteEvent>) {
        if self.held.remove(&note) {
            out.push(NoteEvent::NoteOff { note });
        }
    }

    fn handle_keys(&mut self, events: &[(egui::Key, bool)], out: &mut Vec<NoteEvent>) {
        for &(key, pressed) in events {
            match key {
                egui::Key::ArrowLeft if pressed => {
                    self.octave_offset = (self.octave_offset - 1).clamp(-1, 1);
                }
                egui::Key::ArrowRight if pressed => {
                    self.octave_offset = (self.octave_offset + 1).clamp(-1, 1);
                }
                _ if pressed => {
                    if self.key_notes.contains_key(&key) {
                        continue;
                    }
                    if let Some(note) = key_to_note(key, self.octave_offset) {
                        self.key_notes.insert(key, note);
                        self.press(note, out);
                    }
                }
                _ => {
                    if let Some(note) = self.key_notes.remove(&key) {
                        self.release(note, out);
                    }
                }
            }
        }
    }

    fn apply_mouse(&mut self, input: PianoInput, out: &mut Vec<NoteEvent>) {
        let target = if input.pointer_down { input.hovered } else { None };
        if target == self.mouse_note {
            return;
        }
        if let Some(prev) = self.mouse_note.take() {
            self.release(prev, out);
        }
        if let Some(note) = target {
            self.press(note, out);
            self.mouse_note = Some(note);
        }
    }

    /// Forgets everything held, for when the stream is replaced.
    fn clear(&mut self) {
        self.held.clear();
        self.key_notes.clear();
        self.mouse_note = None;
    }
}

#[derive(Default)]
struct PianoInput {
    pointer_down: bool,
    hovered: Option<u8>,
}

fn draw_scope(ui: &mut egui::Ui, scope: &ScopeView) {
    let desired = egui::vec2(ui.available_width().max(200.0), 240.0);
    let (rect, _) = ui.allocate_exact_size(desired, egui::Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, Rounding::same(6.0), Color32::BLACK);

    let mid = rect.center().y;
    let top = Rect::from_min_max(rect.min, egui::pos2(rect.max.x, mid));
    let bottom = Rect::from_min_max(egui::pos2(rect.min.x, mid), rect.max);
    painter.line_segment(
        [top.left_center(), top.right_center()],
        Stroke::new(1.0, Color32::from_gray(50)),
    );

    // Waveform: full scale spans the upper half.
    plot(&painter, scope.waveform(), top, top.center().y, 0.5, TRACE);
    // Spectrum: levels are already 0..1, anchored to the bottom edge.
    plot(&painter, scope.spectrum(), bottom, bottom.bottom(), 1.0, ACCENT);
}

fn plot(
    painter: &egui::Painter,
    data: &[f32],
    rect: Rect,
    baseline: f32,
    gain: f32,
    color: Color32,
) {
    if data.len() < 2 {
        return;
    }
    let last = (data.len() - 1) as f32;
    let points = data
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            let x = egui::lerp(rect.x_range(), i as f32 / last);
            let y = (baseline - value * gain * rect.height()).clamp(rect.top(), rect.bottom());
            egui::pos2(x, y)
        })
        .collect();
    painter.add(egui::Shape::line(points, Stroke::new(1.0, color)));
}

fn draw_placeholder(ui: &mut egui::Ui, message: &str) {
    let desired = egui::vec2(ui.available_width().max(200.0), 240.0);
    let (rect, _) = ui.allocate_exact_size(desired, egui::Sense::hover());
    let painter = ui.painter_at(rect);
    painter.rect_filled(rect, Rounding::same(6.0), ui.visuals().faint_bg_color);
    painter.text(
        rect.center(),
        Align2::CENTER_CENTER,
        message,
        FontId::proportional(14.0),
        ui.visuals().weak_text_color(),
    );
}

fn collect_keyboard_events(ctx: &egui::Context) -> Vec<(egui::Key, bool)> {
    ctx.input(|input| {
        input
            .events
            .iter()
            .filter_map(|event| match event {
                egui::Event::Key {
                    key,
                    pressed,
                    repeat: false,
                    ..
                } => Some((*key, *pressed)),
                _ => None,
            })
            .collect()
    })
}

fn key_to_note(key: egui::Key, octave_offset: i32) -> Option<u8> {
    let index = KEY_ROW.iter().position(|candidate| *candidate == key)?;
    let note = 60 + index as i32 + octave_offset * 12;
    (LOWEST_NOTE as i32..=HIGHEST_NOTE as i32)
        .contains(&note)
        .then_some(note as u8)
}

fn draw_piano(
    ui: &mut egui::Ui,
    ctx: &egui::Context,
    held: &BTreeSet<u8>,
    mouse_note: Option<u8>,
) -> PianoInput {
    let white_count = (LOWEST_NOTE..=HIGHEST_NOTE).filter(|n| !is_black(*n)).count();
    let white_width = (ui.available_width() / white_count as f32).clamp(14.0, 48.0);
    let white_height = white_width * KEY_ASPECT;
    let black_width = white_width * BLACK_KEY_WIDTH_RATIO;
    let black_height = white_height * BLACK_KEY_HEIGHT_RATIO;
    let (rect, response) = ui.allocate_exact_size(
        egui::vec2(white_count as f32 * white_width, white_height),
        egui::Sense::click_and_drag(),
    );
    let painter = ui.painter_at(rect);

    let mut whites = Vec::with_capacity(white_count);
    let mut blacks = Vec::new();
    for note in LOWEST_NOTE..=HIGHEST_NOTE {
        if is_black(note) {
            let x = rect.min.x + whites.len() as f32 * white_width - black_width / 2.0;
            let key = Rect::from_min_size(egui::pos2(x, rect.min.y), egui::vec2(black_width, black_height));
            blacks.push((note, key));
        } else {
            let x = rect.min.x + whites.len() as f32 * white_width;
            let key = Rect::from_min_size(
                egui::pos2(x, rect.min.y),
                egui::vec2(white_width - 1.0, white_height),
            );
            whites.push((note, key));
        }
    }

    let pointer_down = ui.input(|i| i.pointer.primary_down());
    let hovered = ui
        .input(|i| i.pointer.interact_pos())
        .filter(|pos| rect.contains(*pos))
        .and_then(|pos| {
            blacks
                .iter()
                .chain(whites.iter())
                .find(|(_, key)| key.contains(pos))
                .map(|(note, _)| *note)
        });

    let lit = |note: u8| held.contains(&note) || mouse_note == Some(note);
    for (note, key) in &whites {
        let t = ctx.animate_bool(Id::new(("white", *note)), lit(*note));
        let fill = blend(Color32::from_gray(245), ACCENT, t);
        painter.rect(*key, Rounding::same(3.0), fill, Stroke::new(1.0, Color32::BLACK));
        if note % 12 == 0 {
            painter.text(
                egui::pos2(key.center().x, key.max.y - 4.0),
                Align2::CENTER_BOTTOM,
                format!("C{}", note / 12 - 1),
                FontId::monospace(11.0),
                Color32::from_gray(60),
            );
        }
    }
    for (note, key) in &blacks {
        let t = ctx.animate_bool(Id::new(("black", *note)), lit(*note));
        let fill = blend(Color32::from_gray(20), ACCENT, t);
        painter.rect(*key, Rounding::same(2.0), fill, Stroke::new(1.0, Color32::from_gray(10)));
    }

    response.on_hover_text("Click and drag to play");
    PianoInput {
        pointer_down,
        hovered,
    }
}

/// Device picker. `None` follows the system default; `active` is the device
/// the running stream actually opened.
fn output_selector(
    ui: &mut egui::Ui,
    devices: &[String],
    selected: &mut Option<String>,
    active: Option<&str>,
) -> bool {
    let mut choice = selected.clone();
    ComboBox::from_id_source("output_selector")
        .width(220.0)
        .selected_text(selection_label(selected.as_deref(), active))
        .show_ui(ui, |ui| {
            ui.selectable_value(&mut choice, None, "Default output");
            for name in devices {
                ui.selectable_value(&mut choice, Some(name.clone()), name);
            }
        });
    if choice == *selected {
        return false;
    }
    *selected = choice;
    true
}

fn selection_label(selected: Option<&str>, active: Option<&str>) -> String {
    match (selected, active) {
        (None, Some(active)) => format!("Default output ({active})"),
        (None, None) => "Default output".to_string(),
        (Some(wanted), Some(active)) if wanted != active => format!("{wanted} (using {active})"),
        (Some(wanted), _) => wanted.to_string(),
    }
}

fn card(ui: &mut egui::Ui, title: &str, add_contents: impl FnOnce(&mut egui::Ui)) {
    egui::Frame::group(ui.style())
        .rounding(Rounding::same(8.0))
        .inner_margin(egui::Margin::same(10.0))
        .show(ui, |ui| {
            ui.colored_label(ACCENT, title);
            ui.add_space(4.0);
            add_contents(ui);
        });
}

fn theme_selector(ui: &mut egui::Ui, ctx: &egui::Context, settings: &mut AppSettings) -> bool {
    let mut selected = settings.theme;
    ComboBox::from_id_source("theme_selector")
        .selected_text(selected.label())
        .show_ui(ui, |ui| {
            for theme in [ThemeKind::Dark, ThemeKind::Light] {
                ui.selectable_value(&mut selected, theme, theme.label());
            }
        });

    if selected == settings.theme {
        return false;
    }
    settings.theme = selected;
    apply_theme(ctx, selected);
    true
}

fn apply_theme(ctx: &egui::Context, theme: ThemeKind) {
    let visuals = match theme {
        ThemeKind::Dark => egui::Visuals::dark(),
        ThemeKind::Light => egui::Visuals::light(),
    };
    ctx.set_visuals(visuals);
}

fn is_black(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

fn blend(from: Color32, to: Color32, t: f32) -> Color32 {
    let t = t.clamp(0.0, 1.0);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * t).round() as u8;
    Color32::from_rgb(mix(from.r(), to.r()), mix(from.g(), to.g()), mix(from.b(), to.b()))
}
