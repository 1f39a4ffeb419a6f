use std::io::{self, Write};

use chrono::{DateTime, Utc};
use console::{Style, style};
use indicatif::{ProgressBar, ProgressStyle};

use crate::fleet::{DoctorReport, LaunchReport};
use crate::tasks::{ShipState, Task, TaskStatus, VoyageState, VoyageStatus};
use crate::voyage::Voyage;

pub struct Display;

impl Display {
    pub fn new() -> Self {
        Self
    }

    pub fn print_success(&self, text: &str) {
        println!("{} {}", style("✓").green(), text);
    }

    pub fn print_error(&self, text: &str) {
        eprintln!("{} {}", style("✗").red(), text);
    }

    pub fn print_warning(&self, text: &str) {
        println!("{} {}", style("!").yellow(), text);
    }

    pub fn print_info(&self, text: &str) {
        println!("{}", style(text).dim());
    }

    pub fn create_spinner(&self, message: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));
        spinner
    }

    /// Ask before a destructive operation. Anything but y/yes declines.
    pub fn confirm(&self, prompt: &str) -> io::Result<bool> {
        print!("{prompt} [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let answer = input.trim().to_lowercase();
        Ok(answer == "y" || answer == "yes")
    }

    pub fn print_launch_report(&self, report: &LaunchReport) {
        let voyage = &report.voyage;
        println!();
        self.print_success(&format!("Voyage {} launched", style(&voyage.id).bold()));
        println!("  Repo:   {}", voyage.repo);
        println!("  Branch: {}", voyage.branch);
        println!(
            "  Ships:  {} launched{}",
            report.outcome.launched.len(),
            if report.outcome.failures.is_empty() {
                String::new()
            } else {
                format!(", {} failed", report.outcome.failures.len())
            }
        );

        for failure in &report.outcome.failures {
            self.print_warning(&format!("ship-{}: {}", failure.index, failure.error));
        }

        println!();
        println!("Ships are now autonomous. Check on them with:");
        self.print_info(&format!("  armada status {}", voyage.id));
    }

    pub fn print_status(&self, voyage: &Voyage, status: &VoyageStatus) {
        println!();
        println!("{} {}", style("Voyage:").bold(), voyage.id);
        let objective = truncate(&voyage.objective, 80);
        println!("{} {}", style("Objective:").bold(), objective);
        println!(
            "{} {}",
            style("State:").bold(),
            self.voyage_state_style(status.state)
        );

        if !status.ships.is_empty() {
            println!();
            println!("{}", style("Ships:").bold());
            println!(
                "  {:<10} {:<9} {:<28} {:>9}",
                "SHIP", "STATE", "CURRENT TASK", "COMPLETED"
            );
            for ship in &status.ships {
                let task = match (&ship.current_task, &ship.claimed_at) {
                    (Some(task), Some(claimed)) => {
                        format!("{task} ({} ago)", format_age(*claimed))
                    }
                    (Some(task), None) => task.clone(),
                    _ => "—".to_string(),
                };
                println!(
                    "  {:<10} {:<9} {:<28} {:>9}",
                    ship.id,
                    self.ship_state_style(ship.state).to_string(),
                    truncate(&task, 28),
                    ship.completed_count
                );
            }
        }

        println!();
        println!("{}", style("Tasks:").bold());
        println!("  Complete:    {}", status.tasks_complete);
        let stale_note = if status.tasks_stale > 0 {
            format!(" ({} stale)", status.tasks_stale)
        } else {
            String::new()
        };
        println!("  In progress: {}{stale_note}", status.tasks_in_progress);
        println!("  Pending:     {}", status.tasks_pending);
        println!("  Total:       {}", status.tasks_total);

        if !status.faults.is_empty() {
            println!();
            self.print_warning(&format!("{} data fault(s) in task files:", status.faults.len()));
            for fault in &status.faults {
                println!("  {}: {}", fault.task_id, fault.detail);
            }
        }
    }

    pub fn print_tasks_table(&self, tasks: &[Task]) {
        if tasks.is_empty() {
            self.print_info("No tasks.");
            return;
        }

        println!(
            "{:<12} {:<40} {:<12} {:<10} {}",
            "ID", "TITLE", "STATUS", "ASSIGNEE", "BLOCKED BY"
        );
        for task in tasks {
            let blocked = if task.blocked_by.is_empty() {
                "—".to_string()
            } else {
                task.blocked_by.join(", ")
            };
            println!(
                "{:<12} {:<40} {:<12} {:<10} {}",
                task.id,
                truncate(&task.title, 40),
                self.task_status_style(task.status).to_string(),
                task.metadata.assignee.as_deref().unwrap_or("—"),
                blocked
            );
        }
    }

    pub fn print_doctor(&self, report: &DoctorReport) {
        println!();
        println!("{}", style("Checking prerequisites...").bold());
        println!();
        for check in &report.checks {
            if check.ok {
                println!("  {} {} ({})", style("✓").green(), check.name, style(&check.detail).dim());
            } else {
                println!("  {} {} — {}", style("✗").red(), check.name, check.detail);
            }
        }
        println!();
        if report.all_ok() {
            self.print_success("All systems ready. You may set sail.");
        } else {
            self.print_error("Some checks failed; address them before sailing.");
        }
    }

    fn voyage_state_style(&self, state: VoyageState) -> console::StyledObject<String> {
        let text = state.to_string();
        match state {
            VoyageState::Planning => style(text).yellow(),
            VoyageState::Running => style(text).blue(),
            VoyageState::Stalled => style(text).red(),
            VoyageState::Complete => style(text).green(),
        }
    }

    fn ship_state_style(&self, state: ShipState) -> console::StyledObject<String> {
        let text = state.to_string();
        match state {
            ShipState::Working => style(text).blue(),
            ShipState::Idle => style(text).dim(),
            ShipState::Stale => style(text).red(),
            ShipState::Unknown => style(text).dim(),
        }
    }

    fn task_status_style(&self, status: TaskStatus) -> console::StyledObject<String> {
        let text = status.to_string();
        match status {
            TaskStatus::Pending => Style::new().dim().apply_to(text),
            TaskStatus::InProgress => style(text).blue(),
            TaskStatus::Complete => style(text).green(),
        }
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn format_age(from: DateTime<Utc>) -> String {
    let minutes = (Utc::now() - from).num_minutes().max(0);
    if minutes < 1 {
        "<1m".to_string()
    } else if minutes < 60 {
        format!("{minutes}m")
    } else {
        format!("{}h{}m", minutes / 60, minutes % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate("short", 10), "short");
    }

    #[test]
    fn truncate_adds_ellipsis() {
        assert_eq!(truncate("a very long title indeed", 10), "a very ...");
    }
}
