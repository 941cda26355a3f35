pub mod dashboard;
pub mod prompt;

use ratatui::Frame;

use crate::app::App;
use crate::core::AppState;

/// Main draw function that dispatches to appropriate view
pub fn draw(frame: &mut Frame, app: &App) {
    match &app.state {
        AppState::Idle | AppState::EditingLabel => {
            dashboard::draw_dashboard(frame, app);
        }
        AppState::ConfirmDestructive(device) => {
            dashboard::draw_dashboard(frame, app);
            prompt::draw_confirm_dialog(frame, app, device);
        }
        AppState::Output => {
            prompt::draw_output_page(frame, app);
        }
        AppState::Error(msg) => {
            dashboard::draw_dashboard(frame, app);
            prompt::draw_status_message(frame, msg, prompt::MessageType::Error);
        }
        AppState::Success(msg) => {
            dashboard::draw_dashboard(frame, app);
            prompt::draw_status_message(frame, msg, prompt::MessageType::Success);
        }
    }
}
