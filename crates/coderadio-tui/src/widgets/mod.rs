pub mod progress_bar;
pub mod toast;
