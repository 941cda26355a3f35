use std::path::PathBuf;

use crate::config::Config;
use crate::core::devices::DeviceEnumerator;
use crate::core::format::{FormatCommandBuilder, FormatSelection, validate_label};
use crate::core::job::{JobOutcome, JobSupervisor, JobUpdate};
use crate::core::{
    AppState, DiskError, DisplayEntry, FileSystemType, PartitionScheme, ValidationError,
};
use crate::utils::is_root;

/// Main application state
pub struct App {
    pub entries: Vec<DisplayEntry>,
    pub selected_index: usize,
    pub state: AppState,
    pub input_buffer: String,
    pub label: String,
    pub label_error: Option<String>,
    pub fs_options: Vec<FileSystemType>,
    pub selected_fs_index: usize,
    pub scheme_options: Vec<PartitionScheme>,
    pub selected_scheme_index: usize,
    pub show_all: bool,
    pub show_partitions: bool,
    pub output_lines: Vec<String>,
    pub enumerator: DeviceEnumerator,
    pub builder: FormatCommandBuilder,
    pub supervisor: JobSupervisor,
    pub scratch_log: PathBuf,
    pub should_quit: bool,
    pub tick: u64,
}

impl App {
    pub fn new(enumerator: DeviceEnumerator, config: &Config) -> Self {
        let mut app = Self {
            entries: Vec::new(),
            selected_index: 0,
            state: AppState::Idle,
            input_buffer: String::new(),
            label: config.label.clone(),
            label_error: None,
            fs_options: FileSystemType::options(),
            selected_fs_index: 0,
            scheme_options: PartitionScheme::options(),
            selected_scheme_index: 0,
            show_all: config.show_all,
            show_partitions: config.show_partitions,
            output_lines: Vec::new(),
            builder: FormatCommandBuilder::new(config.helper.clone(), is_root()),
            enumerator,
            supervisor: JobSupervisor::new(),
            scratch_log: config.scratch_log.clone(),
            should_quit: false,
            tick: 0,
        };
        app.validate_label();
        app
    }

    pub async fn refresh_devices(&mut self) {
        self.entries = self
            .enumerator
            .build_display_list(self.show_all, self.show_partitions)
            .await;
        if self.selected_index >= self.entries.len() {
            self.selected_index = self.entries.len().saturating_sub(1);
        }
    }

    pub fn select_next(&mut self) {
        if !self.entries.is_empty() {
            self.selected_index = (self.selected_index + 1) % self.entries.len();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.entries.is_empty() {
            if self.selected_index == 0 {
                self.selected_index = self.entries.len() - 1;
            } else {
                self.selected_index -= 1;
            }
        }
    }

    pub fn cycle_fs(&mut self) {
        if !self.fs_options.is_empty() {
            self.selected_fs_index = (self.selected_fs_index + 1) % self.fs_options.len();
            self.validate_label();
        }
    }

    pub fn cycle_scheme(&mut self) {
        if self.partitioning_enabled() && !self.scheme_options.is_empty() {
            self.selected_scheme_index = (self.selected_scheme_index + 1) % self.scheme_options.len();
        }
    }

    pub async fn toggle_show_all(&mut self) {
        self.show_all = !self.show_all;
        self.refresh_devices().await;
    }

    pub async fn toggle_show_partitions(&mut self) {
        self.show_partitions = !self.show_partitions;
        self.refresh_devices().await;
    }

    pub fn selected_entry(&self) -> Option<&DisplayEntry> {
        self.entries.get(self.selected_index)
    }

    pub fn selected_fs(&self) -> Option<FileSystemType> {
        self.fs_options.get(self.selected_fs_index).copied()
    }

    pub fn selected_scheme(&self) -> Option<PartitionScheme> {
        self.scheme_options.get(self.selected_scheme_index).copied()
    }

    /// Partition tables only make sense when formatting whole disks
    pub fn partitioning_enabled(&self) -> bool {
        !self.show_partitions
    }

    pub fn next_enabled(&self) -> bool {
        self.label_error.is_none() && self.supervisor.affordances().next_enabled
    }

    pub fn push_label_char(&mut self, c: char) {
        self.label.push(c);
        self.validate_label();
    }

    pub fn pop_label_char(&mut self) {
        self.label.pop();
        self.validate_label();
    }

    fn validate_label(&mut self) {
        let format = self.selected_fs().map(|fs| fs.token()).unwrap_or_default();
        self.label_error = validate_label(&self.label, format)
            .err()
            .map(|e| e.to_string());
    }

    pub fn enter_label_edit(&mut self) {
        self.state = AppState::EditingLabel;
    }

    /// "Next" on the options page: ask for a typed confirmation
    pub fn enter_confirm_mode(&mut self) {
        if self.supervisor.is_active() {
            self.state = AppState::Output;
            return;
        }
        if !self.next_enabled() {
            return;
        }
        match self.selected_entry() {
            Some(entry) => {
                let name = entry.device.name.clone();
                self.input_buffer.clear();
                self.state = AppState::ConfirmDestructive(name);
            }
            None => {
                self.state = AppState::Error(ValidationError::NoDeviceSelected.to_string());
            }
        }
    }

    pub fn cancel(&mut self) {
        self.state = AppState::Idle;
        self.input_buffer.clear();
    }

    pub fn selection(&self) -> FormatSelection {
        FormatSelection {
            entry: self
                .selected_entry()
                .map(|entry| entry.text.clone())
                .unwrap_or_default(),
            format: self
                .selected_fs()
                .map(|fs| fs.token().to_string())
                .unwrap_or_default(),
            label: self.label.clone(),
            partition_scheme: self
                .selected_scheme()
                .map(|scheme| scheme.display_name().to_string())
                .unwrap_or_default(),
            partitioning_enabled: self.partitioning_enabled(),
        }
    }

    pub fn format_selected(&mut self) {
        let AppState::ConfirmDestructive(device) = &self.state else {
            return;
        };
        let device = device.clone();

        // Verify confirmation input matches device name
        if self.input_buffer != device {
            self.state = AppState::Error(format!(
                "Confirmation mismatch. Expected '{}', got '{}'",
                device, self.input_buffer
            ));
            return;
        }

        let request = match self.builder.build(&self.entries, &self.selection()) {
            Ok(request) => request,
            Err(e) => {
                self.state = AppState::Error(e.to_string());
                return;
            }
        };

        match self.supervisor.submit(request) {
            Ok(()) => {
                self.output_lines.clear();
                self.state = AppState::Output;
            }
            Err(DiskError::JobBusy) => self.state = AppState::Output,
            Err(e) => self.state = AppState::Error(e.to_string()),
        }
    }

    /// Back from the output page; stops the job if it is still running
    pub async fn leave_output(&mut self) {
        if self.supervisor.is_active() {
            if !self.supervisor.affordances().back_enabled {
                return;
            }
            self.supervisor.cancel().await;
            self.pump_job().await;
        }
        if self.state == AppState::Output {
            self.cancel();
            self.output_lines.clear();
        }
    }

    /// Applies whatever the supervisor reported since the last tick
    pub async fn pump_job(&mut self) {
        for update in self.supervisor.poll() {
            match update {
                JobUpdate::Starting => {
                    self.output_lines
                        .push("Starting USB formatting process...".to_string());
                }
                JobUpdate::Started => {}
                JobUpdate::Output(line) => self.output_lines.push(line),
                JobUpdate::Finished(JobOutcome::Succeeded) => {
                    self.state = AppState::Success(
                        "USB device has been formatted successfully!\n\nYou can now safely remove the device."
                            .to_string(),
                    );
                    self.enumerator.settle().await;
                    self.refresh_devices().await;
                }
                JobUpdate::Finished(JobOutcome::Failed(failure)) => {
                    let mut msg = format!("Error occurred during formatting process: {failure}");
                    if !failure.detail().is_empty() {
                        msg.push_str("\n\nDetails:\n");
                        msg.push_str(failure.detail());
                    }
                    self.state = AppState::Error(msg);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Args;
    use crate::core::devices::tests::sample_probe;
    use clap::Parser;
    use std::sync::Arc;

    async fn app() -> App {
        let config = Config::new(Args::parse_from(["formatusb", "--helper", "/nonexistent/helper"])).unwrap();
        let mut app = App::new(DeviceEnumerator::new(Arc::new(sample_probe())), &config);
        app.refresh_devices().await;
        app
    }

    #[tokio::test]
    async fn test_toggles_refresh_list() {
        let mut app = app().await;
        assert_eq!(app.entries.len(), 2);

        app.toggle_show_all().await;
        assert_eq!(app.entries.len(), 3);

        app.toggle_show_partitions().await;
        assert!(!app.partitioning_enabled());
        assert_eq!(app.entries[0].device.name, "sdb1");
    }

    #[tokio::test]
    async fn test_label_validation_follows_format() {
        let mut app = app().await;
        assert!(app.next_enabled());

        for c in " X".chars() {
            app.push_label_char(c);
        }
        // fat32 rejects spaces
        assert!(app.label_error.is_some());
        assert!(!app.next_enabled());

        app.cycle_fs(); // exfat
        assert_eq!(app.selected_fs(), Some(FileSystemType::ExFat));
        assert!(app.label_error.is_none());
    }

    #[tokio::test]
    async fn test_confirmation_mismatch() {
        let mut app = app().await;
        app.enter_confirm_mode();
        assert_eq!(app.state, AppState::ConfirmDestructive("sdb".to_string()));

        app.input_buffer = "sdc".to_string();
        app.format_selected();
        assert!(matches!(app.state, AppState::Error(ref msg) if msg.contains("mismatch")));
    }

    #[tokio::test]
    async fn test_missing_helper_aborts_before_submission() {
        let mut app = app().await;
        app.enter_confirm_mode();
        app.input_buffer = "sdb".to_string();
        app.format_selected();

        assert!(matches!(app.state, AppState::Error(ref msg) if msg.contains("/nonexistent/helper")));
        assert!(!app.supervisor.is_active());
    }

    #[tokio::test]
    async fn test_selection_uses_sentinel_when_showing_partitions() {
        let mut app = app().await;
        assert!(app.selection().partitioning_enabled);
        assert_eq!(app.selection().partition_scheme, "MSDOS");
        assert_eq!(app.selection().entry, "sdb (14.9G) [Ultra Fit] [SanDisk]");

        app.toggle_show_partitions().await;
        assert!(!app.selection().partitioning_enabled);
    }
}
