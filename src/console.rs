use std::io::Write;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::context::AppContext;
use crate::error::{Ez3dError, Result};
use crate::library::{self, Lookup};
use crate::reconcile;

const HELP: &str = "\
Type part of a name or email to show that user's latest files.
  :users     list every user folder
  :refresh   fetch new submissions now
  :docs      open the documentation
  :help      show this text
  :quit      exit";

/// Whether the console keeps reading after a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Line-oriented stand-in for the desktop window: search, refresh, docs.
pub struct Console<W> {
    ctx: Arc<AppContext>,
    out: W,
    /// Seeded once at startup; users added later show up only after a restart.
    suggestions: Vec<String>,
    current_user: Option<String>,
}

impl<W: Write> Console<W> {
    pub fn new(ctx: Arc<AppContext>, out: W) -> Self {
        let suggestions = library::user_folders(&ctx.settings().files_dir);
        Self {
            ctx,
            out,
            suggestions,
            current_user: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn current_user(&self) -> Option<&str> {
        self.current_user.as_deref()
    }

    pub async fn handle(&mut self, line: &str) -> Result<Flow> {
        let line = line.trim();
        match line {
            "" => {}
            ":q" | ":quit" | ":exit" => return Ok(Flow::Quit),
            ":h" | ":help" => self.print(HELP)?,
            ":users" => {
                let users = library::user_folders(&self.ctx.settings().files_dir);
                if users.is_empty() {
                    self.print("no user folders yet")?;
                }
                for user in users {
                    self.print(&user)?;
                }
            }
            ":refresh" => self.refresh().await?,
            ":docs" => self.open_docs()?,
            query => self.search(query)?,
        }
        Ok(Flow::Continue)
    }

    fn search(&mut self, query: &str) -> Result<()> {
        let root = self.ctx.settings().files_dir.clone();
        match library::lookup(&root, query) {
            Lookup::Found { user, files } => {
                self.print(&format!("== {user} =="))?;
                if files.is_empty() {
                    self.print("  (no files)")?;
                }
                let now = SystemTime::now();
                for file in &files {
                    let line = format!(
                        "  {:<40} {:>14}  {}",
                        file.file_name(),
                        file.age_label(now),
                        file.path.display()
                    );
                    self.print(&line)?;
                }
                self.current_user = Some(user);
            }
            Lookup::NotFound => {
                let hints = self.completions(query);
                if hints.is_empty() {
                    self.print(&format!("no user matches '{query}'"))?;
                } else {
                    self.print(&format!("no user matches '{query}'; did you mean: {}", hints.join(", ")))?;
                }
            }
            Lookup::Ambiguous(users) => {
                self.print(&format!("'{query}' matches {} users: {}", users.len(), users.join(", ")))?;
            }
        }
        Ok(())
    }

    /// Startup user names starting with the query, ignoring case.
    fn completions(&self, query: &str) -> Vec<String> {
        let prefix = query.to_lowercase();
        self.suggestions
            .iter()
            .filter(|u| u.to_lowercase().starts_with(&prefix))
            .take(5)
            .cloned()
            .collect()
    }

    async fn refresh(&mut self) -> Result<()> {
        self.print("refreshing...")?;
        match reconcile::reconcile(&self.ctx).await {
            Ok(summary) => {
                self.print(&format!(
                    "{} new file(s) from {} row(s)",
                    summary.files_downloaded, summary.rows_seen
                ))?;
            }
            // Keep the console alive; the next refresh or cycle retries.
            Err(e) => {
                tracing::error!(error = %e, "manual refresh failed");
                self.print(&format!("refresh failed: {e}"))?;
            }
        }
        Ok(())
    }

    fn open_docs(&mut self) -> Result<()> {
        let url = self.ctx.settings().documentation_url.clone();
        if let Err(e) = open::that(&url) {
            tracing::warn!(error = %e, url = %url, "failed to open browser");
            self.print(&format!("documentation: {url}"))?;
        }
        Ok(())
    }

    fn print(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{text}").map_err(|e| Ez3dError::Io {
            path: "<stdout>".into(),
            source: e,
        })
    }
}

/// Read commands from stdin until `:quit` or end of input.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let mut console = Console::new(ctx, std::io::stdout());
    console.print(HELP)?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("ez3d> ");
        std::io::stdout().flush().ok();

        let next = lines.next_line().await.map_err(|e| Ez3dError::Io {
            path: "<stdin>".into(),
            source: e,
        })?;
        let Some(line) = next else {
            break;
        };
        if console.handle(&line).await? == Flow::Quit {
            break;
        }
    }
    Ok(())
}
