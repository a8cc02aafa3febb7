mod engine;
mod error;
mod logging;
mod models;
mod sync;
mod transport;

use std::fs;
use std::io;
use std::panic;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};

use error::SyncError;
use models::SyncConfig;
use sync::SyncReport;

const SPINNER: [char; 4] = ['|', '/', '-', '\\'];

// ------------------------------ bootstrap ----------------------------------

struct Bootstrap {
    cfg: SyncConfig,
    state_dir: PathBuf,
    device_base: PathBuf,
}

fn load_or_init_config(state_dir: &Path, home: &Path) -> error::Result<SyncConfig> {
    let path = state_dir.join("config.json");
    if path.exists() {
        let txt = fs::read_to_string(&path).map_err(|e| SyncError::io("read", &path, e))?;
        serde_json::from_str(&txt).map_err(|e| SyncError::BadConfig { path, source: e })
    } else {
        let cfg = SyncConfig::default_for_home(home);
        let json = serde_json::to_string_pretty(&cfg).map_err(|e| SyncError::BadConfig {
            path: path.clone(),
            source: e,
        })?;
        fs::write(&path, json).map_err(|e| SyncError::io("write", &path, e))?;
        tracing::info!("wrote default config to {}", path.display());
        Ok(cfg)
    }
}

fn bootstrap() -> error::Result<Bootstrap> {
    let home = dirs::home_dir().ok_or(SyncError::NoHome)?;
    let state_dir = home.join(".phonesync");

    for dir in [state_dir.clone(), state_dir.join("snapshots")] {
        if !dir.is_dir() {
            println!("Creating directory {}...", dir.display());
            fs::create_dir_all(&dir).map_err(|e| SyncError::io("create dir", &dir, e))?;
        }
    }

    if let Err(e) = logging::init(&state_dir.join("logs")) {
        eprintln!("WARNING: could not set up the log file: {e}");
    }

    let cfg = load_or_init_config(&state_dir, &home)?;

    if !cfg.pull_root.is_dir() {
        println!("Creating directory {}...", cfg.pull_root.display());
        fs::create_dir_all(&cfg.pull_root)
            .map_err(|e| SyncError::io("create dir", &cfg.pull_root, e))?;
    }

    // Pre-flight: the sync pass wants the device already resolved to a single
    // mounted path.
    let device_base = sync::discover_device_root(&cfg)?;
    tracing::info!("device storage at {}", device_base.display());

    Ok(Bootstrap {
        cfg,
        state_dir,
        device_base,
    })
}

// --------------------------------- app -------------------------------------

struct App {
    header: String,
    progress: u16,
    status_msg: String,
    activity: Vec<String>,
    spinner_tick: u64,
    done: bool,
    failed: bool,
    progress_rx: mpsc::Receiver<(f32, String)>,
    outcome_rx: mpsc::Receiver<Result<SyncReport, String>>,
}

impl App {
    fn check_progress(&mut self) {
        for (p, msg) in self.progress_rx.try_iter() {
            self.progress = p as u16;
            self.status_msg = msg.clone();
            self.activity.push(msg);
        }

        for outcome in self.outcome_rx.try_iter() {
            self.done = true;
            match outcome {
                Ok(_) => {
                    self.progress = 100;
                }
                Err(e) => {
                    self.failed = true;
                    let msg = format!("❌ {e}");
                    self.status_msg = msg.clone();
                    self.activity.push(msg);
                }
            }
        }
    }
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(1),
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(1),
            ]
            .as_ref(),
        )
        .split(f.size());

    let header =
        Paragraph::new(app.header.clone()).style(Style::default().fg(Color::Black).bg(Color::White));
    f.render_widget(header, chunks[0]);

    let gauge_color = if app.failed { Color::Red } else { Color::Green };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Progress "))
        .gauge_style(Style::default().fg(gauge_color))
        .percent(app.progress.min(100));
    f.render_widget(gauge, chunks[1]);

    let visible = chunks[2].height.saturating_sub(2) as usize;
    let start = app.activity.len().saturating_sub(visible);
    let items: Vec<ListItem> = app.activity[start..]
        .iter()
        .map(|line| ListItem::new(line.clone()))
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(" Activity "));
    f.render_widget(list, chunks[2]);

    let footer_text = if app.done {
        format!(" {} Press q to quit.", app.status_msg)
    } else {
        let spin = SPINNER[(app.spinner_tick / 2) as usize % SPINNER.len()];
        format!(" {spin} {}", app.status_msg)
    };
    let footer_style = if app.failed {
        Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)
    } else if app.done {
        Style::default().fg(Color::Green)
    } else {
        Style::default().fg(Color::Yellow)
    };
    f.render_widget(Paragraph::new(footer_text).style(footer_style), chunks[3]);
}

// -------------------------------- main --------------------------------------

fn main() -> Result<(), io::Error> {
    let ctx = match bootstrap() {
        Ok(ctx) => ctx,
        Err(e) => {
            tracing::error!("startup failed: {e}");
            eprintln!("ERROR! {e}");
            std::process::exit(1);
        }
    };

    let (progress_tx, progress_rx) = mpsc::channel();
    let (outcome_tx, outcome_rx) = mpsc::channel();
    {
        let cfg = ctx.cfg.clone();
        let state_dir = ctx.state_dir.clone();
        let device_base = ctx.device_base.clone();
        thread::spawn(move || {
            let result = sync::run_full(
                &cfg,
                &state_dir,
                &device_base,
                &transport::LocalFs,
                &progress_tx,
            );
            match &result {
                Ok(report) => tracing::info!("finished: {report:?}"),
                Err(e) => tracing::error!("aborted: {e}"),
            }
            outcome_tx.send(result.map_err(|e| e.to_string())).ok();
        });
    }

    let mut app = App {
        header: format!(
            " -- PHONESYNC -- {} <-> {}",
            ctx.cfg.doc_root.display(),
            ctx.device_base.display()
        ),
        progress: 0,
        status_msg: "Starting sync...".into(),
        activity: Vec::new(),
        spinner_tick: 0,
        done: false,
        failed: false,
        progress_rx,
        outcome_rx,
    };

    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        terminal.draw(|f| ui(f, &app))?;

        app.check_progress();
        app.spinner_tick = app.spinner_tick.wrapping_add(1);

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => break,
                        _ => {}
                    }
                }
            }
        }
    }

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    if app.failed {
        std::process::exit(1);
    }
    Ok(())
}
