use anyhow::{Context, Result};
use crossterm::{
    event::{Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{prelude::*, widgets::*};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;

use crate::{
    blog::{BlogDraft, BlogPost},
    controller::{AppController, DELETE_PROMPT, ViewState},
    log_capture::{LogBuffer, MAX_LOG_LINES},
    notification::{Notification, NotificationKind},
};

// ── Public config ─────────────────────────────────────────────────────────────

pub struct TuiConfig {
    pub api_url: String,
    pub controller: Arc<AppController>,
    pub log_buffer: LogBuffer,
}

// ── Focus / state machine ─────────────────────────────────────────────────────

const TICK_MS: u64 = 500;

#[derive(Default)]
enum Focus {
    #[default]
    List,
    Login,
    NewBlog,
    ConfirmDelete {
        id: String,
        title: String,
    },
}

#[derive(Clone, Copy, PartialEq)]
enum LoginField {
    Username,
    Password,
}

#[derive(Clone, Copy, PartialEq)]
enum BlogField {
    Title,
    Author,
    Url,
}

impl BlogField {
    fn next(self) -> Self {
        match self {
            BlogField::Title => BlogField::Author,
            BlogField::Author => BlogField::Url,
            BlogField::Url => BlogField::Title,
        }
    }
}

struct BlogForm {
    title: String,
    author: String,
    url: String,
    field: BlogField,
}

impl Default for BlogForm {
    fn default() -> Self {
        Self {
            title: String::new(),
            author: String::new(),
            url: String::new(),
            field: BlogField::Title,
        }
    }
}

impl BlogForm {
    fn current_mut(&mut self) -> &mut String {
        match self.field {
            BlogField::Title => &mut self.title,
            BlogField::Author => &mut self.author,
            BlogField::Url => &mut self.url,
        }
    }

    fn draft(&self) -> BlogDraft {
        BlogDraft::new(self.title.clone(), self.author.clone(), self.url.clone())
    }
}

struct App {
    controller: Arc<AppController>,
    api_url: String,
    view: ViewState,
    notification: Option<Notification>,
    focus: Focus,
    selected: usize,
    login_field: LoginField,
    form: BlogForm,
    log_buffer: LogBuffer,
    log_scroll: u16, // lines scrolled up from tail (0 = follow tail)
}

impl App {
    fn selected_blog(&self) -> Option<BlogPost> {
        self.view.sorted_blogs().into_iter().nth(self.selected)
    }

    fn clamp_selection(&mut self) {
        let len = self.view.blogs.len();
        if self.selected >= len {
            self.selected = len.saturating_sub(1);
        }
    }
}

/// Results reported back from spawned controller calls.
enum UiEvent {
    Created(bool),
}

// ── Actions returned by key handlers ─────────────────────────────────────────

enum Action {
    None,
    Quit,
    Reload,
    Login,
    Logout,
    Like(String),
    ToggleImportance(String),
    Delete { id: String, confirmed: bool },
    Create(BlogDraft),
}

// ── Entry point ───────────────────────────────────────────────────────────────

pub async fn run(config: TuiConfig) -> Result<()> {
    let controller = config.controller;
    let mut state_rx = controller.subscribe();
    let mut notice_rx = controller.notifier().subscribe();

    {
        let c = Arc::clone(&controller);
        tokio::spawn(async move { c.bootstrap().await });
    }

    // Setup terminal.
    enable_raw_mode().context("Failed to enable raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Spawn a dedicated thread for blocking crossterm event reads.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    std::thread::spawn(move || {
        loop {
            match crossterm::event::poll(Duration::from_millis(50)) {
                Ok(true) => match crossterm::event::read() {
                    Ok(evt) => {
                        if event_tx.send(evt).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {}
                Err(_) => break,
            }
        }
    });

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    let mut app = App {
        view: controller.snapshot(),
        controller,
        api_url: config.api_url,
        notification: None,
        focus: Focus::List,
        selected: 0,
        login_field: LoginField::Username,
        form: BlogForm::default(),
        log_buffer: config.log_buffer,
        log_scroll: 0,
    };

    let mut tick = tokio::time::interval(Duration::from_millis(TICK_MS));

    let result: Result<()> = 'main: loop {
        if let Err(e) = terminal.draw(|f| render(f, &app)) {
            break 'main Err(e.into());
        }

        tokio::select! {
            Some(event) = event_rx.recv() => {
                if let Event::Key(key) = event {
                    if key.kind != KeyEventKind::Press {
                        continue 'main;
                    }
                    if key.modifiers.contains(KeyModifiers::CONTROL)
                        && matches!(key.code, KeyCode::Char('c'))
                    {
                        break 'main Ok(());
                    }

                    match handle_key(&mut app, key.code) {
                        Action::Quit => break 'main Ok(()),
                        action => execute_action(&app, action, &ui_tx),
                    }
                }
            }
            Ok(()) = state_rx.changed() => {
                app.view = state_rx.borrow_and_update().clone();
                app.clamp_selection();
                // A successful login lands back on the list.
                if matches!(app.focus, Focus::Login) && app.view.is_authenticated() {
                    app.focus = Focus::List;
                }
            }
            Ok(()) = notice_rx.changed() => {
                app.notification = notice_rx.borrow_and_update().clone();
            }
            Some(UiEvent::Created(ok)) = ui_rx.recv() => {
                if ok {
                    app.form = BlogForm::default();
                    if matches!(app.focus, Focus::NewBlog) {
                        app.focus = Focus::List;
                    }
                }
            }
            _ = tick.tick() => {}
        }
    };

    // Always restore the terminal.
    let _ = disable_raw_mode();
    let _ = execute!(terminal.backend_mut(), LeaveAlternateScreen);
    let _ = terminal.show_cursor();

    result
}

// ── Key handling ─────────────────────────────────────────────────────────────

fn handle_key(app: &mut App, key: KeyCode) -> Action {
    match app.focus {
        Focus::List => handle_list_key(app, key),
        Focus::Login => handle_login_key(app, key),
        Focus::NewBlog => handle_blog_form_key(app, key),
        Focus::ConfirmDelete { .. } => handle_confirm_key(app, key),
    }
}

fn handle_list_key(app: &mut App, key: KeyCode) -> Action {
    match key {
        KeyCode::Char('q') => Action::Quit,
        KeyCode::Up | KeyCode::Char('k') => {
            app.selected = app.selected.saturating_sub(1);
            Action::None
        }
        KeyCode::Down | KeyCode::Char('j') => {
            if app.selected + 1 < app.view.blogs.len() {
                app.selected += 1;
            }
            Action::None
        }
        KeyCode::PageUp => {
            app.log_scroll = app
                .log_scroll
                .saturating_add(10)
                .min(MAX_LOG_LINES as u16);
            Action::None
        }
        KeyCode::PageDown => {
            app.log_scroll = app.log_scroll.saturating_sub(10);
            Action::None
        }
        KeyCode::Char('r') => Action::Reload,
        KeyCode::Char('l') | KeyCode::Enter => match app.selected_blog() {
            Some(blog) => Action::Like(blog.id),
            None => Action::None,
        },
        KeyCode::Char('i') => match app.selected_blog() {
            Some(blog) => Action::ToggleImportance(blog.id),
            None => Action::None,
        },
        KeyCode::Char('d') => {
            if let Some(blog) = app.selected_blog() {
                app.focus = Focus::ConfirmDelete {
                    id: blog.id,
                    title: blog.title,
                };
            }
            Action::None
        }
        KeyCode::Char('n') if app.view.is_authenticated() => {
            app.focus = Focus::NewBlog;
            Action::None
        }
        KeyCode::Char('a') if !app.view.is_authenticated() => {
            app.login_field = LoginField::Username;
            app.focus = Focus::Login;
            Action::None
        }
        KeyCode::Char('o') if app.view.is_authenticated() => Action::Logout,
        _ => Action::None,
    }
}

/// Login inputs live in the controller so they survive a failed attempt.
fn handle_login_key(app: &mut App, key: KeyCode) -> Action {
    match key {
        KeyCode::Esc => {
            app.focus = Focus::List;
            Action::None
        }
        KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
            app.login_field = match app.login_field {
                LoginField::Username => LoginField::Password,
                LoginField::Password => LoginField::Username,
            };
            Action::None
        }
        KeyCode::Backspace => {
            edit_login_field(app, |s| {
                s.pop();
            });
            Action::None
        }
        KeyCode::Char(c) => {
            edit_login_field(app, |s| s.push(c));
            Action::None
        }
        KeyCode::Enter => match app.login_field {
            LoginField::Username => {
                app.login_field = LoginField::Password;
                Action::None
            }
            LoginField::Password => Action::Login,
        },
        _ => Action::None,
    }
}

fn edit_login_field(app: &mut App, edit: impl FnOnce(&mut String)) {
    match app.login_field {
        LoginField::Username => {
            let mut value = app.view.username.clone();
            edit(&mut value);
            app.controller.set_username(value);
        }
        LoginField::Password => {
            let mut value = app.view.password.clone();
            edit(&mut value);
            app.controller.set_password(value);
        }
    }
}

fn handle_blog_form_key(app: &mut App, key: KeyCode) -> Action {
    match key {
        KeyCode::Esc => {
            app.focus = Focus::List;
            Action::None
        }
        KeyCode::Tab | KeyCode::Down => {
            app.form.field = app.form.field.next();
            Action::None
        }
        KeyCode::Backspace => {
            app.form.current_mut().pop();
            Action::None
        }
        KeyCode::Char(c) => {
            app.form.current_mut().push(c);
            Action::None
        }
        KeyCode::Enter => {
            if app.form.field == BlogField::Url {
                Action::Create(app.form.draft())
            } else {
                app.form.field = app.form.field.next();
                Action::None
            }
        }
        _ => Action::None,
    }
}

fn handle_confirm_key(app: &mut App, key: KeyCode) -> Action {
    let Focus::ConfirmDelete { ref id, .. } = app.focus else {
        return Action::None;
    };

    let confirmed = match key {
        KeyCode::Char('y') | KeyCode::Char('Y') => true,
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => false,
        _ => return Action::None,
    };
    let id = id.clone();
    app.focus = Focus::List;
    Action::Delete { id, confirmed }
}

// ── Async action execution ────────────────────────────────────────────────────

/// Every controller call runs in its own task so input stays responsive while
/// requests are in flight.
fn execute_action(app: &App, action: Action, ui_tx: &mpsc::UnboundedSender<UiEvent>) {
    let c = Arc::clone(&app.controller);
    match action {
        Action::None | Action::Quit => {}
        Action::Reload => {
            tokio::spawn(async move { c.bootstrap().await });
        }
        Action::Login => {
            tokio::spawn(async move { c.login().await });
        }
        Action::Logout => {
            tokio::spawn(async move { c.logout().await });
        }
        Action::Like(id) => {
            tokio::spawn(async move { c.like(&id).await });
        }
        Action::ToggleImportance(id) => {
            tokio::spawn(async move { c.toggle_importance(&id).await });
        }
        Action::Delete { id, confirmed } => {
            tokio::spawn(async move {
                c.delete_post(&id, move |_: &str| confirmed).await;
            });
        }
        Action::Create(draft) => {
            let ui_tx = ui_tx.clone();
            tokio::spawn(async move {
                let ok = c.create_post(draft).await;
                let _ = ui_tx.send(UiEvent::Created(ok));
            });
        }
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    // Outer layout: title (3) | notification (3) | body (fill) | logs (8) | help (3)
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(8),
            Constraint::Length(3),
        ])
        .split(area);

    render_title(frame, outer[0], app);
    render_notification(frame, outer[1], app);
    render_body(frame, outer[2], app);
    render_logs_panel(frame, outer[3], app);
    render_help(frame, outer[4], app);

    if let Focus::ConfirmDelete { title, .. } = &app.focus {
        render_confirm(frame, area, title);
    }
}

fn render_title(frame: &mut Frame, area: Rect, app: &App) {
    let who = match &app.view.user {
        Some(user) => format!("{} logged in", user.name.as_deref().unwrap_or(&user.username)),
        None => "not logged in".to_string(),
    };
    let title = Paragraph::new(format!("blogs  │  {}  │  {who}", app.api_url))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD));
    frame.render_widget(title, area);
}

fn render_notification(frame: &mut Frame, area: Rect, app: &App) {
    let line = match &app.notification {
        Some(n) => {
            let style = match n.kind {
                NotificationKind::Info => Style::default().fg(Color::Green),
                NotificationKind::Error => Style::default().fg(Color::Red),
            };
            Line::from(Span::styled(format!(" {}", n.message), style))
        }
        None => Line::from(""),
    };
    frame.render_widget(
        Paragraph::new(line).block(Block::default().borders(Borders::ALL)),
        area,
    );
}

fn render_body(frame: &mut Frame, area: Rect, app: &App) {
    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Fill(1), Constraint::Fill(2)])
        .split(area);

    match app.focus {
        Focus::Login => render_login_form(frame, cols[0], app),
        Focus::NewBlog => render_blog_form(frame, cols[0], app),
        _ => render_account(frame, cols[0], app),
    }
    render_blog_list(frame, cols[1], app);
}

fn render_account(frame: &mut Frame, area: Rect, app: &App) {
    let hint = |s: &'static str| Line::from(Span::styled(s, Style::default().fg(Color::DarkGray)));
    let lines = match &app.view.user {
        Some(user) => vec![
            Line::from(format!(" {} ({})", user.name.as_deref().unwrap_or("-"), user.username)),
            Line::from(""),
            hint(" n  new blog"),
            hint(" o  log out"),
        ],
        None => vec![Line::from(" Log in to add blogs"), Line::from(""), hint(" a  log in")],
    };
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Account ")),
        area,
    );
}

fn input_field<'a>(title: &'a str, value: String, focused: bool) -> Paragraph<'a> {
    let style = if focused {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    Paragraph::new(format!(" {value}")).block(
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .style(style),
    )
}

fn render_login_form(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default().borders(Borders::ALL).title(" Log in ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // username
            Constraint::Length(3), // password
            Constraint::Length(1), // hints
            Constraint::Min(0),
        ])
        .split(inner);

    let masked = "*".repeat(app.view.password.chars().count());
    frame.render_widget(
        input_field(
            "Username",
            app.view.username.clone(),
            app.login_field == LoginField::Username,
        ),
        rows[0],
    );
    frame.render_widget(
        input_field("Password", masked, app.login_field == LoginField::Password),
        rows[1],
    );
    frame.render_widget(
        Paragraph::new(Span::styled(
            " Enter to log in   Tab to switch   Esc to cancel",
            Style::default().fg(Color::DarkGray),
        )),
        rows[2],
    );
}

fn render_blog_form(frame: &mut Frame, area: Rect, app: &App) {
    let block = Block::default().borders(Borders::ALL).title(" Create new ");
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(1),
            Constraint::Min(0),
        ])
        .split(inner);

    let form = &app.form;
    frame.render_widget(
        input_field("Title", form.title.clone(), form.field == BlogField::Title),
        rows[0],
    );
    frame.render_widget(
        input_field("Author", form.author.clone(), form.field == BlogField::Author),
        rows[1],
    );
    frame.render_widget(
        input_field("Url", form.url.clone(), form.field == BlogField::Url),
        rows[2],
    );
    frame.render_widget(
        Paragraph::new(Span::styled(
            " Enter on Url to create   Esc to cancel",
            Style::default().fg(Color::DarkGray),
        )),
        rows[3],
    );
}

fn render_blog_list(frame: &mut Frame, area: Rect, app: &App) {
    let items: Vec<ListItem> = app
        .view
        .sorted_blogs()
        .iter()
        .map(|blog| {
            let marker = if blog.important { "★ " } else { "  " };
            let owner = blog
                .owner
                .as_ref()
                .map(|o| format!("  @{}", o.username))
                .unwrap_or_default();
            ListItem::new(vec![
                Line::from(vec![
                    Span::raw(marker),
                    Span::styled(blog.title.clone(), Style::default().add_modifier(Modifier::BOLD)),
                    Span::raw(format!("  {}", blog.author)),
                ]),
                Line::from(Span::styled(
                    format!("    {}  likes {}{owner}", blog.url, blog.likes),
                    Style::default().fg(Color::DarkGray),
                )),
            ])
        })
        .collect();

    let mut list_state = ListState::default();
    if !items.is_empty() && matches!(app.focus, Focus::List | Focus::ConfirmDelete { .. }) {
        list_state.select(Some(app.selected));
    }

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(" blogs "))
        .highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    frame.render_stateful_widget(list, area, &mut list_state);
}

fn render_logs_panel(frame: &mut Frame, area: Rect, app: &App) {
    let entries = app.log_buffer.snapshot();

    let inner_height = area.height.saturating_sub(2) as usize;
    // log_scroll counts lines scrolled *up* from the tail; 0 follows the tail.
    let max_scroll = entries.len().saturating_sub(inner_height) as u16;
    let scroll_up = app.log_scroll.min(max_scroll);
    let display_row = max_scroll.saturating_sub(scroll_up);

    let lines: Vec<Line> = entries
        .iter()
        .map(|entry| Line::from(Span::styled(entry.render(), log_level_style(entry.level))))
        .collect();

    let title = if scroll_up > 0 {
        format!(" Logs  ↑{scroll_up}  PgDn to follow ")
    } else {
        " Logs  [tail]  PgUp to scroll ".to_string()
    };

    let logs = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title(title))
        .scroll((display_row, 0));

    frame.render_widget(logs, area);
}

fn log_level_style(level: tracing::Level) -> Style {
    match level {
        tracing::Level::ERROR => Style::default().fg(Color::Red),
        tracing::Level::WARN => Style::default().fg(Color::Yellow),
        tracing::Level::INFO => Style::default().fg(Color::White),
        tracing::Level::DEBUG | tracing::Level::TRACE => Style::default().fg(Color::DarkGray),
    }
}

fn render_help(frame: &mut Frame, area: Rect, app: &App) {
    let text = match app.focus {
        Focus::List => " ↑↓/jk select  l like  i important  d delete  r reload  q quit",
        Focus::Login | Focus::NewBlog => " Tab next field  Enter submit  Esc cancel",
        Focus::ConfirmDelete { .. } => " y confirm  n cancel",
    };
    frame.render_widget(
        Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL))
            .style(Style::default().fg(Color::Cyan)),
        area,
    );
}

fn render_confirm(frame: &mut Frame, area: Rect, title: &str) {
    let width = area.width.min(60);
    let height = 6;
    let popup = Rect {
        x: area.x + (area.width.saturating_sub(width)) / 2,
        y: area.y + (area.height.saturating_sub(height)) / 2,
        width,
        height: height.min(area.height),
    };

    let text = vec![
        Line::from(format!(" {DELETE_PROMPT}")),
        Line::from(Span::styled(
            format!(" {title}"),
            Style::default().add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(" y / n", Style::default().fg(Color::DarkGray))),
    ];

    frame.render_widget(Clear, popup);
    frame.render_widget(
        Paragraph::new(text).block(
            Block::default()
                .borders(Borders::ALL)
                .title(" Delete ")
                .style(Style::default().fg(Color::Red)),
        ),
        popup,
    );
}
