use std::io::{self, Stdout};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use d1v_adapters::d1::D1Client;
use d1v_adapters::sqlite::SqliteOpener;
use d1v_core::cascade::{Coordinator, JobOutcome, Level, LevelStatus};
use d1v_core::fetch::FetchExecutor;
use d1v_core::links::{token_creation_link, APP_DISPLAY_NAME};
use d1v_core::pagination::PageLimit;
use d1v_core::source::{Mode, ResultSet, SourceError};
use d1v_core::storage::{CredentialStore, ModeStore, Token};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap};
use ratatui::{Frame, Terminal};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{info, warn};

const TICK_RATE: Duration = Duration::from_millis(120);
const SIDEBAR_WIDTH: u16 = 28;
const SKELETON_ROWS: usize = 5;
const SKELETON_LINE: &str = "░░░░░░░░░░░░░░░░";

#[derive(Debug, Error)]
pub enum TuiError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to set up data sources: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub api_base: String,
    pub limit: PageLimit,
    pub local_delay: Duration,
    /// Pre-opens this database file and starts in Local mode.
    pub initial_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Forward,
    Backward,
}

impl Step {
    fn is_forward(self) -> bool {
        self == Self::Forward
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputKey {
    Char(char),
    Backspace,
    Submit,
    Cancel,
    RemoveToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Msg {
    Quit,
    ToggleHelp,
    ToggleMode,
    CycleAccount(Step),
    CycleDatabase(Step),
    CycleTable(Step),
    Page(Step),
    Limit(Step),
    Refresh,
    OpenTokenDialog,
    OpenFilePrompt,
    Input(InputKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Overlay {
    None,
    Credentials { input: String },
    OpenFile { input: String },
}

struct TuiApp {
    coordinator: Coordinator,
    credentials: Box<dyn CredentialStore>,
    modes: Option<ModeStore>,
    overlay: Overlay,
    alert: Option<String>,
    show_help: bool,
    should_quit: bool,
    status_line: String,
    token_link: String,
}

impl TuiApp {
    fn new(
        credentials: Box<dyn CredentialStore>,
        modes: Option<ModeStore>,
        config: &ViewerConfig,
    ) -> Self {
        let mut status_line = String::from("Ready");
        let token = credentials.load().unwrap_or_else(|error| {
            warn!(error = %error, "failed to load stored token");
            status_line = format!("Stored token unavailable: {error}");
            None
        });

        let mode = if config.initial_file.is_some() {
            Mode::Local
        } else {
            modes
                .as_ref()
                .map(|store| {
                    store.load().unwrap_or_else(|error| {
                        warn!(error = %error, "failed to load viewer mode");
                        Mode::default()
                    })
                })
                .unwrap_or_default()
        };

        let mut coordinator = Coordinator::new(token, mode);
        coordinator.set_default_limit(config.limit);
        if let Some(path) = &config.initial_file {
            coordinator.open_local(path.clone());
            status_line = format!("Opening {}", path.display());
        }

        let overlay = if mode == Mode::Remote && coordinator.token().is_none() {
            Overlay::Credentials {
                input: String::new(),
            }
        } else {
            Overlay::None
        };

        Self {
            coordinator,
            credentials,
            modes,
            overlay,
            alert: None,
            show_help: false,
            should_quit: false,
            status_line,
            token_link: token_creation_link(APP_DISPLAY_NAME),
        }
    }

    fn is_typing(&self) -> bool {
        self.overlay != Overlay::None
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.alert.is_some() {
            if matches!(key.code, KeyCode::Enter | KeyCode::Esc | KeyCode::Char(' ')) {
                self.alert = None;
            }
            return;
        }
        if self.show_help && key.code == KeyCode::Esc {
            self.show_help = false;
            return;
        }
        if let Some(message) = map_key_event(key, self.is_typing()) {
            self.handle(message);
        }
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Quit => self.should_quit = true,
            Msg::ToggleHelp => self.show_help = !self.show_help,
            Msg::ToggleMode => self.switch_mode(self.coordinator.mode().toggled()),
            Msg::CycleAccount(step) => {
                if self.require_remote("Accounts") {
                    self.coordinator.cycle_account(step.is_forward());
                    self.status_line = format!("Account: {}", self.account_label());
                }
            }
            Msg::CycleDatabase(step) => {
                if self.require_remote("Databases") {
                    self.coordinator.cycle_database(step.is_forward());
                    self.status_line = format!("Database: {}", self.database_label());
                }
            }
            Msg::CycleTable(step) => {
                self.coordinator.cycle_table(step.is_forward());
                if let Some(table) = self.coordinator.selected_table() {
                    self.status_line = format!("Table: {table}");
                }
            }
            Msg::Page(Step::Forward) => self.coordinator.next_page(),
            Msg::Page(Step::Backward) => self.coordinator.previous_page(),
            Msg::Limit(step) => {
                let current = self.coordinator.limit();
                let limit = if step.is_forward() {
                    current.next()
                } else {
                    current.previous()
                };
                self.coordinator.set_limit(limit);
                self.status_line = format!("Showing {} rows per page", limit.rows());
            }
            Msg::Refresh => {
                self.coordinator.refresh_rows();
                self.status_line = "Refreshing rows".to_string();
            }
            Msg::OpenTokenDialog => {
                let input = self
                    .coordinator
                    .token()
                    .map(|token| token.expose().to_string())
                    .unwrap_or_default();
                self.overlay = Overlay::Credentials { input };
            }
            Msg::OpenFilePrompt => {
                if self.coordinator.mode() != Mode::Local {
                    self.switch_mode(Mode::Local);
                }
                self.overlay = Overlay::OpenFile {
                    input: String::new(),
                };
            }
            Msg::Input(key) => self.handle_input(key),
        }
    }

    fn handle_input(&mut self, key: InputKey) {
        match key {
            InputKey::Char(character) => {
                if let Overlay::Credentials { input } | Overlay::OpenFile { input } =
                    &mut self.overlay
                {
                    input.push(character);
                }
            }
            InputKey::Backspace => {
                if let Overlay::Credentials { input } | Overlay::OpenFile { input } =
                    &mut self.overlay
                {
                    input.pop();
                }
            }
            InputKey::Cancel => self.overlay = Overlay::None,
            InputKey::Submit => match &self.overlay {
                Overlay::Credentials { input } => {
                    let input = input.clone();
                    self.save_token(&input);
                }
                Overlay::OpenFile { input } => {
                    let input = input.clone();
                    self.open_file(&input);
                }
                Overlay::None => {}
            },
            InputKey::RemoveToken => {
                if matches!(self.overlay, Overlay::Credentials { .. }) {
                    self.remove_token();
                }
            }
        }
    }

    fn save_token(&mut self, input: &str) {
        let Some(token) = Token::parse(input) else {
            self.status_line = "Enter an API token to save".to_string();
            return;
        };
        if let Err(error) = self.credentials.save(&token) {
            warn!(error = %error, "failed to persist token");
            self.raise_alert(format!("Token is active but could not be saved: {error}"));
        }
        self.coordinator.set_token(token);
        self.overlay = Overlay::None;
        self.status_line = "Token saved".to_string();
        info!("api token updated");
    }

    fn remove_token(&mut self) {
        if let Err(error) = self.credentials.clear() {
            warn!(error = %error, "failed to remove stored token");
            self.raise_alert(format!("Stored token could not be removed: {error}"));
        }
        self.coordinator.clear_token();
        self.overlay = Overlay::Credentials {
            input: String::new(),
        };
        self.status_line = "Token removed".to_string();
        info!("api token removed");
    }

    fn open_file(&mut self, input: &str) {
        let path = input.trim();
        if path.is_empty() {
            self.status_line = "Enter the path of a database file".to_string();
            return;
        }
        self.coordinator.open_local(PathBuf::from(path));
        self.overlay = Overlay::None;
        self.status_line = format!("Opening {path}");
    }

    fn switch_mode(&mut self, mode: Mode) {
        self.coordinator.set_mode(mode);
        if let Some(store) = &self.modes {
            if let Err(error) = store.save(mode) {
                warn!(error = %error, "failed to persist viewer mode");
            }
        }
        self.status_line = format!("{} mode", mode.label());
        if mode == Mode::Remote && self.coordinator.token().is_none() {
            self.overlay = Overlay::Credentials {
                input: String::new(),
            };
        }
    }

    fn require_remote(&mut self, what: &str) -> bool {
        if self.coordinator.mode() == Mode::Remote {
            return true;
        }
        self.status_line = format!("{what} are only available in Remote mode");
        false
    }

    fn apply(&mut self, outcome: JobOutcome) {
        self.coordinator.apply(outcome);
        if let Some(message) = self.coordinator.take_alert() {
            self.raise_alert(message);
        }
    }

    fn raise_alert(&mut self, message: String) {
        if self.alert.is_none() {
            self.alert = Some(message);
        }
    }

    fn account_label(&self) -> String {
        let selected = self.coordinator.selected_account();
        self.coordinator
            .accounts()
            .iter()
            .find(|account| Some(account.id.as_str()) == selected)
            .map_or_else(|| "-".to_string(), |account| account.name.clone())
    }

    fn database_label(&self) -> String {
        let selected = self.coordinator.selected_database();
        self.coordinator
            .databases()
            .iter()
            .find(|database| Some(database.uuid.as_str()) == selected)
            .map_or_else(|| "-".to_string(), |database| database.name.clone())
    }

    fn tables_loading(&self) -> bool {
        let coordinator = &self.coordinator;
        match coordinator.mode() {
            Mode::Remote => [Level::Accounts, Level::Databases, Level::Tables]
                .into_iter()
                .any(|level| coordinator.status(level) == LevelStatus::Loading),
            Mode::Local => {
                coordinator.is_opening_file()
                    || coordinator.status(Level::Tables) == LevelStatus::Loading
            }
        }
    }

    fn rows_loading(&self) -> bool {
        self.tables_loading() || self.coordinator.status(Level::Rows) == LevelStatus::Loading
    }
}

pub fn run(
    config: ViewerConfig,
    credentials: Box<dyn CredentialStore>,
    modes: Option<ModeStore>,
    runtime: &Handle,
) -> Result<(), TuiError> {
    let directory = Arc::new(D1Client::new(config.api_base.clone())?);
    let executor = Arc::new(
        FetchExecutor::new(directory, Arc::new(SqliteOpener)).with_local_delay(config.local_delay),
    );
    let app = TuiApp::new(credentials, modes, &config);
    info!(api_base = %config.api_base, mode = app.coordinator.mode().label(), "starting viewer");

    let mut terminal = setup_terminal()?;
    let run_result = run_loop(&mut terminal, app, &executor, runtime);
    let restore_result = restore_terminal(&mut terminal);

    if let Err(error) = run_result {
        restore_result?;
        return Err(error);
    }

    restore_result?;
    Ok(())
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>, TuiError> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<(), TuiError> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    mut app: TuiApp,
    executor: &Arc<FetchExecutor>,
    runtime: &Handle,
) -> Result<(), TuiError> {
    let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

    loop {
        while let Ok(outcome) = outcome_rx.try_recv() {
            app.apply(outcome);
        }
        for job in app.coordinator.plan() {
            executor.spawn(job, runtime, &outcome_tx);
        }

        terminal.draw(|frame| render(frame, &app))?;

        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    Ok(())
}

fn render(frame: &mut Frame<'_>, app: &TuiApp) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(4),
        ])
        .split(frame.area());

    render_header(frame, app, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(SIDEBAR_WIDTH), Constraint::Min(20)])
        .split(chunks[1]);
    render_sidebar(frame, app, body[0]);
    render_rows(frame, app, body[1]);
    render_footer(frame, app, chunks[2]);

    match &app.overlay {
        Overlay::Credentials { input } => render_credentials_dialog(frame, app, input),
        Overlay::OpenFile { input } => render_open_file_prompt(frame, input),
        Overlay::None => {}
    }
    if app.show_help {
        render_help_popup(frame);
    }
    if let Some(message) = &app.alert {
        render_alert(frame, message);
    }
}

fn render_header(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let coordinator = &app.coordinator;
    let mode = coordinator.mode();
    let mut spans = vec![
        Span::styled(
            format!(" {} ", mode.label()),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" | "),
    ];

    match mode {
        Mode::Remote => {
            spans.push(Span::raw(format!(
                "Account: {}{}",
                app.account_label(),
                level_marker(coordinator.status(Level::Accounts))
            )));
            spans.push(Span::raw(" | "));
            spans.push(Span::raw(format!(
                "Database: {}{}",
                app.database_label(),
                level_marker(coordinator.status(Level::Databases))
            )));
        }
        Mode::Local => {
            let file = coordinator
                .loaded_file()
                .map_or("no file", |file| file.name.as_str());
            let opening = if coordinator.is_opening_file() {
                " (opening)"
            } else {
                ""
            };
            spans.push(Span::raw(format!("File: {file}{opening}")));
        }
    }

    spans.push(Span::raw(" | "));
    spans.push(Span::raw(format!("Limit: {}", coordinator.limit().rows())));
    spans.push(Span::raw(" | "));
    spans.push(Span::raw(format!(
        "Page: {}{}",
        coordinator.page(),
        level_marker(coordinator.status(Level::Rows))
    )));

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Cloudflare D1 Viewer"),
    );
    frame.render_widget(header, area);
}

fn level_marker(status: LevelStatus) -> &'static str {
    match status {
        LevelStatus::Loading => " (loading)",
        LevelStatus::Failed => " (error)",
        LevelStatus::Idle | LevelStatus::Ready => "",
    }
}

fn render_sidebar(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let lines = if app.tables_loading() {
        (0..SKELETON_ROWS)
            .map(|_| Line::styled(SKELETON_LINE, Style::default().fg(Color::DarkGray)))
            .collect::<Vec<_>>()
    } else if app.coordinator.tables().is_empty() {
        vec![Line::from("No tables")]
    } else {
        let selected = app.coordinator.selected_table();
        app.coordinator
            .tables()
            .iter()
            .map(|table| {
                if Some(table.as_str()) == selected {
                    Line::styled(
                        format!("> {table}"),
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    )
                } else {
                    Line::from(format!("  {table}"))
                }
            })
            .collect()
    };

    let sidebar =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Tables"));
    frame.render_widget(sidebar, area);
}

fn render_rows(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let coordinator = &app.coordinator;
    let title = coordinator
        .selected_table()
        .map_or_else(|| "Rows".to_string(), |table| format!("Rows: {table}"));
    let block = Block::default().borders(Borders::ALL).title(title);

    if app.rows_loading() {
        frame.render_widget(Paragraph::new("Loading rows...").block(block), area);
        return;
    }

    let Some(rows) = coordinator.rows() else {
        let hint = match coordinator.error(Level::Rows) {
            Some(error) => format!("Failed to load rows: {error}"),
            None => empty_hint(app),
        };
        frame.render_widget(
            Paragraph::new(hint)
                .wrap(Wrap { trim: false })
                .block(block),
            area,
        );
        return;
    };

    if rows.is_empty() {
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let parts = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(2), Constraint::Length(1)])
            .split(inner);
        frame.render_widget(rows_table(rows), parts[0]);
        frame.render_widget(
            Paragraph::new("No data").alignment(Alignment::Center),
            parts[1],
        );
        return;
    }

    frame.render_widget(rows_table(rows).block(block), area);
}

fn rows_table(rows: &ResultSet) -> Table<'_> {
    let header = Row::new(rows.columns.iter().map(|column| Cell::from(column.as_str())))
        .style(Style::default().add_modifier(Modifier::BOLD));
    let body = rows.rows.iter().map(|row| {
        Row::new(
            row.iter()
                .map(|value| Cell::from(value.display_text()))
                .collect::<Vec<_>>(),
        )
    });
    let widths = vec![Constraint::Fill(1); rows.columns.len().max(1)];
    Table::new(body, widths).header(header)
}

fn empty_hint(app: &TuiApp) -> String {
    let coordinator = &app.coordinator;
    match coordinator.mode() {
        Mode::Remote if coordinator.token().is_none() => {
            "No API token. Press t to connect to Cloudflare.".to_string()
        }
        Mode::Local if coordinator.loaded_file().is_none() => {
            "No database loaded. Press o to open a .sqlite, .db or .sqlite3 file.".to_string()
        }
        Mode::Remote | Mode::Local => "Select a table to browse its rows.".to_string(),
    }
}

fn render_footer(frame: &mut Frame<'_>, app: &TuiApp, area: Rect) {
    let keys = match app.coordinator.mode() {
        Mode::Remote => {
            "a/A account | d/D database | up/down table | left/right page | +/- limit | r refresh | t token | m mode | ? help | q quit"
        }
        Mode::Local => {
            "o open file | up/down table | left/right page | +/- limit | r refresh | m mode | ? help | q quit"
        }
    };
    let footer = Paragraph::new(vec![
        Line::from(keys),
        Line::from(format!("Status: {}", app.status_line)),
    ])
    .block(Block::default().borders(Borders::ALL).title("Keys"));
    frame.render_widget(footer, area);
}

fn render_credentials_dialog(frame: &mut Frame<'_>, app: &TuiApp, input: &str) {
    let area = centered_rect(76, 60, frame.area());
    frame.render_widget(Clear, area);

    let masked = "*".repeat(input.chars().count());
    let save_hint = if input.trim().is_empty() {
        Span::styled("Enter: save", Style::default().fg(Color::DarkGray))
    } else {
        Span::styled("Enter: save", Style::default().fg(Color::Green))
    };
    let dialog = Paragraph::new(vec![
        Line::from(format!("API Token: {masked}_")),
        Line::from(""),
        Line::from("Create an API token with D1:Edit permission:"),
        Line::styled(app.token_link.as_str(), Style::default().fg(Color::Blue)),
        Line::from(""),
        Line::from(
            "The token is stored only on this machine and is sent only to the Cloudflare API or the relay you configure.",
        ),
        Line::from(""),
        Line::from(vec![
            save_hint,
            Span::raw(" | Ctrl+R: remove stored token | Esc: close"),
        ]),
    ])
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Connect to Cloudflare"),
    );
    frame.render_widget(dialog, area);
}

fn render_open_file_prompt(frame: &mut Frame<'_>, input: &str) {
    let area = centered_rect(70, 30, frame.area());
    frame.render_widget(Clear, area);
    let prompt = Paragraph::new(vec![
        Line::from(format!("Path: {input}_")),
        Line::from(""),
        Line::from("Accepted: .sqlite, .db, .sqlite3"),
        Line::from("Enter: open | Esc: cancel"),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title("Open database file"),
    );
    frame.render_widget(prompt, area);
}

fn render_alert(frame: &mut Frame<'_>, message: &str) {
    let area = centered_rect(60, 30, frame.area());
    frame.render_widget(Clear, area);
    let alert = Paragraph::new(vec![
        Line::from(message.to_string()),
        Line::from(""),
        Line::from("Press Enter to dismiss"),
    ])
    .wrap(Wrap { trim: false })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red))
            .title("Error"),
    );
    frame.render_widget(alert, area);
}

fn render_help_popup(frame: &mut Frame<'_>) {
    let area = centered_rect(70, 70, frame.area());
    frame.render_widget(Clear, area);
    let help = Paragraph::new(vec![
        Line::from("Global keymap"),
        Line::from("q: quit"),
        Line::from("?: toggle help"),
        Line::from("m: switch between Remote and Local mode"),
        Line::from("a / A: next / previous account"),
        Line::from("d / D: next / previous database"),
        Line::from("Up / Down (k / j): previous / next table"),
        Line::from("Left / Right ([ / ]): previous / next page"),
        Line::from("+ / -: larger / smaller page size"),
        Line::from("r: refresh rows"),
        Line::from("t: API token dialog"),
        Line::from("o: open a local database file"),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    frame.render_widget(help, area);
}

fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

fn map_key_event(key: KeyEvent, typing: bool) -> Option<Msg> {
    if typing {
        return map_input_key(key).map(Msg::Input);
    }

    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('c')) | (_, KeyCode::Char('q')) => Some(Msg::Quit),
        (_, KeyCode::Char('?')) => Some(Msg::ToggleHelp),
        (_, KeyCode::Char('m')) => Some(Msg::ToggleMode),
        (_, KeyCode::Char('a')) => Some(Msg::CycleAccount(Step::Forward)),
        (_, KeyCode::Char('A')) => Some(Msg::CycleAccount(Step::Backward)),
        (_, KeyCode::Char('d')) => Some(Msg::CycleDatabase(Step::Forward)),
        (_, KeyCode::Char('D')) => Some(Msg::CycleDatabase(Step::Backward)),
        (_, KeyCode::Up | KeyCode::Char('k')) => Some(Msg::CycleTable(Step::Backward)),
        (_, KeyCode::Down | KeyCode::Char('j')) => Some(Msg::CycleTable(Step::Forward)),
        (_, KeyCode::Left | KeyCode::Char('[')) => Some(Msg::Page(Step::Backward)),
        (_, KeyCode::Right | KeyCode::Char(']')) => Some(Msg::Page(Step::Forward)),
        (_, KeyCode::Char('+' | '=')) => Some(Msg::Limit(Step::Forward)),
        (_, KeyCode::Char('-')) => Some(Msg::Limit(Step::Backward)),
        (_, KeyCode::Char('r')) => Some(Msg::Refresh),
        (_, KeyCode::Char('t')) => Some(Msg::OpenTokenDialog),
        (_, KeyCode::Char('o')) => Some(Msg::OpenFilePrompt),
        _ => None,
    }
}

fn map_input_key(key: KeyEvent) -> Option<InputKey> {
    match (key.modifiers, key.code) {
        (KeyModifiers::CONTROL, KeyCode::Char('r')) => Some(InputKey::RemoveToken),
        (KeyModifiers::CONTROL, _) => None,
        (_, KeyCode::Char(character)) => Some(InputKey::Char(character)),
        (_, KeyCode::Backspace) => Some(InputKey::Backspace),
        (_, KeyCode::Enter) => Some(InputKey::Submit),
        (_, KeyCode::Esc) => Some(InputKey::Cancel),
        _ => None,
    }
}
