use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use color_eyre::Result;
use image::Rgb;
use log::warn;
use ratatui::{
    crossterm::event::{self, Event, KeyCode},
    layout::{Constraint, Layout, Rect},
    style::{Color, Modifier, Style, Stylize},
    symbols,
    text::{Line, Span},
    widgets::{
        canvas::{Canvas, Points},
        Block, Clear, Gauge, Paragraph, Wrap,
    },
    DefaultTerminal, Frame,
};

use clap::Parser;
use radar_acquisition::{
    build_controller,
    capture::CaptureKind,
    colormap::PreviewImage,
    driver::SimulatedDriver,
    session::CalibrationOptions,
    AcquisitionController, AcquisitionParams, Confirm, ConfirmPrompt, SaveOutcome, SettingsForm,
};

enum AppEvent {
    Key(KeyCode),
    Redraw,
}

fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let params = AcquisitionParams::parse();
    let controller = build_controller(&params)?;
    let calibration = CalibrationOptions {
        poll_interval: Duration::from_millis(200),
        ..params.calibration_options()
    };

    let terminal = ratatui::init();

    let (event_tx, event_rx) = channel();
    let running = Arc::new(AtomicBool::new(true));

    // Keys are forwarded as they come, the app decides what they mean.
    let event_thread = {
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                if let Ok(true) = event::poll(Duration::from_millis(100)) {
                    let app_event = match event::read() {
                        Ok(Event::Key(key)) => AppEvent::Key(key.code),
                        Ok(Event::Resize(_, _)) => AppEvent::Redraw,
                        _ => continue,
                    };
                    if event_tx.send(app_event).is_err() {
                        break;
                    }
                }
            }
        })
    };

    let app_result = App::new(event_rx, controller, calibration).run(terminal);

    ratatui::restore();
    running.store(false, Ordering::Relaxed);

    let _ = event_thread.join();

    app_result
}

struct Notice {
    text: String,
    error: bool,
}

struct App {
    event_receiver: Receiver<AppEvent>,
    controller: AcquisitionController<SimulatedDriver>,
    calibration: CalibrationOptions,
    focused_field: usize,
    notice: Option<Notice>,
}

impl App {
    fn new(
        event_receiver: Receiver<AppEvent>,
        controller: AcquisitionController<SimulatedDriver>,
        calibration: CalibrationOptions,
    ) -> Self {
        Self {
            event_receiver,
            controller,
            calibration,
            focused_field: 0,
            notice: None,
        }
    }

    fn run(mut self, mut terminal: DefaultTerminal) -> Result<()> {
        terminal.draw(|frame| self.draw(frame))?;

        loop {
            match self.event_receiver.recv() {
                Ok(AppEvent::Key(key)) => {
                    if self.controller.settings_view().is_some() {
                        self.handle_settings_key(key);
                    } else {
                        match key {
                            KeyCode::Char('q') => break,
                            KeyCode::F(1) | KeyCode::Char('t') => {
                                let result = self.controller.trigger_capture();
                                self.report(result, "Triggered");
                            }
                            KeyCode::F(2) | KeyCode::Char('s') => self.save(&mut terminal),
                            KeyCode::F(9) | KeyCode::Char('c') => self.calibrate(&mut terminal),
                            KeyCode::Enter => self.toggle_connection(),
                            KeyCode::Char('p') => {
                                let next = self.controller.profile().next();
                                let result = self.controller.apply_profile_change(next);
                                self.report(result, &format!("Profile {next}"));
                            }
                            KeyCode::Char('1') => self.toggle_kind(CaptureKind::Signals),
                            KeyCode::Char('2') => self.toggle_kind(CaptureKind::ImageSlice),
                            KeyCode::Char('3') => self.toggle_kind(CaptureKind::ImageVolume),
                            KeyCode::Char('e') => {
                                self.controller.open_settings();
                                self.focused_field = 0;
                            }
                            KeyCode::Char('+') => {
                                let counter = self.controller.counter().saturating_add(1);
                                self.controller.set_counter(counter);
                            }
                            KeyCode::Char('-') => {
                                let counter = self.controller.counter().saturating_sub(1);
                                self.controller.set_counter(counter);
                            }
                            KeyCode::Char('v') => {
                                let enabled = !self.controller.preview_enabled();
                                self.controller.set_preview(enabled);
                            }
                            KeyCode::Char('m') => {
                                let palette = self.controller.palette().next();
                                self.controller.set_palette(palette);
                            }
                            _ => {}
                        }
                    }
                    terminal.draw(|frame| self.draw(frame))?;
                }
                Ok(AppEvent::Redraw) => {
                    terminal.draw(|frame| self.draw(frame))?;
                }
                Err(_) => break,
            }
        }

        self.controller.shutdown();
        Ok(())
    }

    fn report(&mut self, result: radar_acquisition::Result<()>, success: &str) {
        self.notice = Some(match result {
            Ok(()) => Notice {
                text: success.to_string(),
                error: false,
            },
            Err(e) => Notice {
                text: e.to_string(),
                error: true,
            },
        });
    }

    fn toggle_connection(&mut self) {
        if self.controller.is_connected() {
            let result = self.controller.disconnect();
            self.report(result, "Disconnected");
        } else {
            let result = self.controller.connect_and_configure();
            self.report(result, "Connected");
        }
    }

    fn toggle_kind(&mut self, kind: CaptureKind) {
        self.controller.selection_mut().toggle(kind);
    }

    fn handle_settings_key(&mut self, key: KeyCode) {
        let fields = SettingsForm::FIELD_COUNT;
        match key {
            KeyCode::Esc => self.controller.close_settings(),
            KeyCode::Tab | KeyCode::Down => {
                self.focused_field = (self.focused_field + 1) % fields;
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.focused_field = (self.focused_field + fields - 1) % fields;
            }
            KeyCode::Left | KeyCode::Right => {
                if let Some(form) = self.controller.settings_view_mut() {
                    form.filter = form.filter.next();
                }
            }
            KeyCode::Backspace => {
                let focused = self.focused_field;
                if let Some(text) = self
                    .controller
                    .settings_view_mut()
                    .and_then(|form| form.field_mut(focused))
                {
                    text.pop();
                }
            }
            KeyCode::Char(c) => {
                let focused = self.focused_field;
                if let Some(text) = self
                    .controller
                    .settings_view_mut()
                    .and_then(|form| form.field_mut(focused))
                {
                    text.push(c);
                }
            }
            KeyCode::Enter => {
                if let Some(form) = self.controller.settings_view().cloned() {
                    let result = self.controller.apply_settings(&form);
                    self.report(result, "Settings applied");
                }
            }
            _ => {}
        }
    }

    fn save(&mut self, terminal: &mut DefaultTerminal) {
        let selection = self.controller.selection();
        let mut modal = ModalConfirm {
            terminal,
            events: &self.event_receiver,
        };
        let notice = match self.controller.save_capture(&selection, &mut modal) {
            Ok(SaveOutcome::Saved(report)) => Notice {
                text: format!(
                    "Saved capture {} ({} files)",
                    report.counter,
                    report.files.len()
                ),
                error: false,
            },
            Ok(SaveOutcome::Declined(_)) => Notice {
                text: "No acquisition(s) were saved".to_string(),
                error: true,
            },
            Err(e) => Notice {
                text: e.to_string(),
                error: true,
            },
        };
        self.notice = Some(notice);
    }

    fn calibrate(&mut self, terminal: &mut DefaultTerminal) {
        let cancel = AtomicBool::new(false);
        let events = &self.event_receiver;
        let result = self
            .controller
            .calibrate(&self.calibration, &cancel, |progress| {
                while let Ok(event) = events.try_recv() {
                    if let AppEvent::Key(KeyCode::Esc) = event {
                        cancel.store(true, Ordering::Relaxed);
                    }
                }
                if let Err(e) = terminal.draw(|frame| draw_calibration(frame, progress)) {
                    warn!("Unable to draw calibration progress: {e}");
                }
            });
        self.report(result, "Calibration completed");
    }

    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::vertical([
            Constraint::Length(3), // Title and status
            Constraint::Fill(1),   // Controls and preview
            Constraint::Length(1), // Notification
            Constraint::Length(1), // Key help
        ])
        .split(area);

        self.draw_status(frame, chunks[0]);

        let body =
            Layout::horizontal([Constraint::Length(44), Constraint::Fill(1)]).split(chunks[1]);
        self.draw_controls(frame, body[0]);
        self.draw_preview(frame, body[1]);

        if let Some(notice) = &self.notice {
            let color = if notice.error { Color::Red } else { Color::Green };
            frame.render_widget(
                Paragraph::new(Span::styled(notice.text.as_str(), Style::default().fg(color))),
                chunks[2],
            );
        }

        frame.render_widget(
            Paragraph::new(
                "F1/t trigger  F2/s save  F9/c calibrate  Enter connect  p profile  \
                 1-3 save types  e settings  +/- counter  v preview  m palette  q quit",
            )
            .fg(Color::DarkGray),
            chunks[3],
        );

        if let Some(form) = self.controller.settings_view() {
            draw_settings(frame, area, form, self.focused_field);
        }
    }

    fn draw_status(&self, frame: &mut Frame, area: Rect) {
        let (state, color) = if self.controller.is_connected() {
            ("Connected", Color::Green)
        } else {
            ("Disconnected", Color::Red)
        };
        let status = Line::from(vec![
            Span::styled(state, Style::default().fg(color).add_modifier(Modifier::BOLD)),
            Span::raw(format!("  profile {}", self.controller.profile())),
            Span::raw(format!("  {:?}", self.controller.session().state())),
        ]);
        frame.render_widget(
            Paragraph::new(status).block(Block::bordered().title("Radar acquisition")),
            area,
        );
    }

    fn draw_controls(&self, frame: &mut Frame, area: Rect) {
        let arena = self.controller.arena();
        let labels = self.controller.profile().coordinates().axis_labels();
        let mut lines: Vec<Line> = labels
            .iter()
            .zip(arena.axes.iter())
            .map(|(label, axis)| Line::from(format!("{label}: {axis}")))
            .collect();
        lines.push(Line::from(format!("Threshold: {}", arena.threshold)));
        lines.push(Line::from(format!("Filter: {}", arena.filter)));
        lines.push(Line::from(""));

        let selection = self.controller.selection();
        for (key, kind) in ["1", "2", "3"].iter().zip(CaptureKind::ALL) {
            let mark = if selection.contains(kind) { "[x]" } else { "[ ]" };
            lines.push(Line::from(format!("{key} {mark} {kind}")));
        }
        lines.push(Line::from(""));

        let naming = self.controller.naming();
        lines.push(Line::from(format!("Next: {}", naming.file_name("<type>"))));
        lines.push(Line::from(format!(
            "Directory: {}",
            naming.directory.display()
        )));
        let saved = if self.controller.capture_saved() {
            Span::styled("saved", Style::default().fg(Color::Green))
        } else {
            Span::styled("not saved", Style::default().fg(Color::Yellow))
        };
        lines.push(Line::from(vec![Span::raw("Current trigger: "), saved]));
        lines.push(Line::from(format!(
            "Preview: {} ({:?})",
            if self.controller.preview_enabled() { "on" } else { "off" },
            self.controller.palette()
        )));

        frame.render_widget(
            Paragraph::new(lines).block(Block::bordered().title("Acquisition")),
            area,
        );
    }

    fn draw_preview(&self, frame: &mut Frame, area: Rect) {
        let block = Block::bordered()
            .title("Image slice")
            .title_alignment(ratatui::layout::Alignment::Center);
        let inner_area = block.inner(area);
        frame.render_widget(block, area);

        let Some(preview) = self.controller.preview() else {
            let hint = if self.controller.preview_enabled() {
                "Trigger to render the current slice"
            } else {
                "Preview disabled (v to enable)"
            };
            frame.render_widget(Paragraph::new(hint).fg(Color::DarkGray), inner_area);
            return;
        };

        // Half blocks give two preview rows per terminal line.
        let width = inner_area.width as usize;
        let height = inner_area.height as usize * 2;
        let canvas = Canvas::default()
            .marker(symbols::Marker::HalfBlock)
            .paint(|ctx| {
                for y in 0..height {
                    for x in 0..width {
                        let Rgb([r, g, b]) = sample(preview, x, y, width, height);
                        ctx.draw(&Points {
                            coords: &[(x as f64, (height - 1 - y) as f64)],
                            color: Color::Rgb(r, g, b),
                        });
                    }
                }
            })
            .x_bounds([0.0, width.saturating_sub(1) as f64])
            .y_bounds([0.0, height.saturating_sub(1) as f64]);
        frame.render_widget(canvas, inner_area);
    }
}

// Nearest-neighbour lookup of the preview pixel under a canvas cell.
fn sample(preview: &PreviewImage, x: usize, y: usize, width: usize, height: usize) -> Rgb<u8> {
    let column = (x * preview.width / width.max(1)).min(preview.width.saturating_sub(1));
    let row = (y * preview.height / height.max(1)).min(preview.height.saturating_sub(1));
    preview.pixel(row, column)
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect::new(
        area.x + (area.width - width) / 2,
        area.y + (area.height - height) / 2,
        width,
        height,
    )
}

fn draw_settings(frame: &mut Frame, area: Rect, form: &SettingsForm, focused: usize) {
    let popup = centered(area, 56, SettingsForm::FIELD_COUNT as u16 + 5);
    let mut lines: Vec<Line> = (0..SettingsForm::FIELD_COUNT)
        .map(|i| {
            let value = form.field(i).map(String::as_str).unwrap_or_default();
            let text = format!("{:<32} {value}", form.field_label(i));
            if i == focused {
                Line::styled(text, Style::default().fg(Color::Black).bg(Color::Yellow))
            } else {
                Line::from(text)
            }
        })
        .collect();
    lines.push(Line::from(format!("{:<32} {}", "Filter (Left/Right)", form.filter)));
    lines.push(Line::from(""));
    lines.push(Line::from("Tab next field  Enter apply  Esc close").fg(Color::DarkGray));

    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(lines).block(Block::bordered().title("Settings")),
        popup,
    );
}

fn draw_prompt(frame: &mut Frame, prompt: &ConfirmPrompt) {
    let popup = centered(frame.area(), 64, 9);
    let text = vec![
        Line::from(prompt.to_string()),
        Line::from(""),
        Line::from("y: yes    n/Esc: no").fg(Color::DarkGray),
    ];
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(text)
            .wrap(Wrap { trim: true })
            .block(Block::bordered().title(prompt.title()).fg(Color::Yellow)),
        popup,
    );
}

fn draw_calibration(frame: &mut Frame, progress: f64) {
    let popup = centered(frame.area(), 50, 3);
    frame.render_widget(Clear, popup);
    frame.render_widget(
        Gauge::default()
            .block(Block::bordered().title("Calibrating (Esc to cancel)"))
            .gauge_style(Style::default().fg(Color::Yellow))
            .ratio((progress / 100.0).clamp(0.0, 1.0)),
        popup,
    );
}

/// Blocks on the key channel until the operator answers the prompt.
struct ModalConfirm<'a> {
    terminal: &'a mut DefaultTerminal,
    events: &'a Receiver<AppEvent>,
}

impl Confirm for ModalConfirm<'_> {
    fn confirm(&mut self, prompt: &ConfirmPrompt) -> bool {
        loop {
            if let Err(e) = self.terminal.draw(|frame| draw_prompt(frame, prompt)) {
                warn!("Unable to draw confirmation: {e}");
                return false;
            }
            match self.events.recv() {
                Ok(AppEvent::Key(KeyCode::Char('y' | 'Y'))) => return true,
                Ok(AppEvent::Key(KeyCode::Char('n' | 'N') | KeyCode::Esc)) => return false,
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    }
}
