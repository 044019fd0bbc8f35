//! # Main Display Module
//!
//! Layout of the trainer window: the pitch panel and recording controls on
//! the left, exercise selection in the sidebar on the right.

use iced::widget::{Space, button, column, container, horizontal_space, row, text};
use iced::{Alignment, Color, Element, Length};
use trainer_core::capture::CaptureState;
use trainer_core::music::FeedbackZone;

use super::pitch_meter::{self, PitchMeter};
use crate::{AppDisplayData, EXERCISES, Message};

const ACTIVE_COLOR: Color = Color { r: 0.2, g: 0.5, b: 0.9, a: 1.0 };
const RECORD_COLOR: Color = Color { r: 0.8, g: 0.2, b: 0.2, a: 1.0 };
const ERROR_COLOR: Color = Color { r: 0.55, g: 0.12, b: 0.12, a: 1.0 };

/// Creates the complete main application view
pub fn create_main_view(data: &AppDisplayData) -> Element<'static, Message> {
    let title = text("Pitch Trainer").size(28);

    let mut content = column![title, Space::with_height(10)].spacing(10);
    if let Some(banner) = create_error_banner(data) {
        content = content.push(banner);
    }
    content = content
        .push(create_pitch_panel(data))
        .push(create_recording_panel(data));

    let main_content = row![
        content.width(Length::Fill),
        Space::with_width(10),
        create_sidebar(data),
    ]
    .align_y(Alignment::Start)
    .padding(20);

    container(main_content)
        .width(Length::Fill)
        .height(Length::Fill)
        .into()
}

fn create_error_banner(data: &AppDisplayData) -> Option<Element<'static, Message>> {
    let message = data.error.clone()?;
    let banner = container(text(message).size(16))
        .padding(12)
        .width(Length::Fill)
        .style(|_theme| container::Style {
            background: Some(iced::Background::Color(ERROR_COLOR)),
            text_color: Some(Color::WHITE),
            ..container::Style::default()
        });
    Some(banner.into())
}

/// Note, frequency, confidence and the cent meter.
fn create_pitch_panel(data: &AppDisplayData) -> Element<'static, Message> {
    let target = data
        .target_name
        .clone()
        .map(|name| format!("Target {name}"))
        .unwrap_or_else(|| "Sing any note".to_string());

    let (note_name, freq_text, confidence) = match &data.reading {
        Some(reading) if reading.estimate.is_voiced() => (
            reading.note_name.clone().unwrap_or_else(|| "--".to_string()),
            format!("{:.1} Hz", reading.estimate.frequency_hz.unwrap_or_default()),
            format!("{:.0}%", reading.estimate.confidence * 100.0),
        ),
        _ => ("--".to_string(), "-- Hz".to_string(), "0%".to_string()),
    };

    let feedback = match data.smoothed_cents {
        Some(cents) => {
            let zone = FeedbackZone::classify(cents, data.in_tune_cents, data.close_cents);
            let label = match zone {
                FeedbackZone::InTune => "In tune!".to_string(),
                FeedbackZone::Close if cents < 0.0 => format!("A little low ({cents:+.0} cents)"),
                FeedbackZone::Close => format!("A little high ({cents:+.0} cents)"),
                FeedbackZone::Off if cents < 0.0 => format!("Too low ({cents:+.0} cents)"),
                FeedbackZone::Off => format!("Too high ({cents:+.0} cents)"),
            };
            text(label).size(16).color(pitch_meter::zone_color(zone))
        }
        None => text("Listening for your voice").size(16),
    };

    let readout = column![
        row![
            text("Note").size(14),
            horizontal_space(),
            text("Confidence").size(14),
        ],
        row![
            text(note_name).size(24),
            Space::with_width(10),
            text(freq_text).size(24),
            horizontal_space(),
            container(text(confidence).size(16)).padding([4, 8]),
        ]
        .align_y(Alignment::Center),
        Space::with_height(10),
        PitchMeter::new(data.smoothed_cents, data.in_tune_cents, data.close_cents).view(),
        feedback,
    ]
    .spacing(5);

    container(
        column![text(target).size(18), Space::with_height(10), readout]
            .spacing(5)
            .padding(15),
    )
    .width(Length::Fill)
    .into()
}

/// Timer and the recording buttons valid in the current state.
fn create_recording_panel(data: &AppDisplayData) -> Element<'static, Message> {
    let state_label = match data.capture_state {
        CaptureState::Idle => "Ready",
        CaptureState::Starting => "Waiting for the microphone",
        CaptureState::Recording => "Recording",
        CaptureState::Paused => "Paused",
        CaptureState::Stopped => "Recording finished",
    };

    let controls = match data.capture_state {
        CaptureState::Idle => row![make_button("Start", Some(Message::StartListening), Some(RECORD_COLOR))],
        CaptureState::Starting => row![make_button("Cancel", Some(Message::StopListening), None)],
        CaptureState::Recording => row![
            make_button("Pause", Some(Message::PauseListening), None),
            make_button("Stop", Some(Message::StopListening), None),
            make_button("Clear", Some(Message::ClearRecording), None),
        ],
        CaptureState::Paused => row![
            make_button("Resume", Some(Message::ResumeListening), None),
            make_button("Stop", Some(Message::StopListening), None),
            make_button("Clear", Some(Message::ClearRecording), None),
        ],
        CaptureState::Stopped => row![
            make_button("Start again", Some(Message::StartListening), Some(RECORD_COLOR)),
            make_button("Save", Some(Message::SaveRecording), None),
            make_button("Clear", Some(Message::ClearRecording), None),
        ],
    }
    .spacing(10);

    let mut panel = column![
        text("Recording").size(18),
        Space::with_height(10),
        row![
            text(state_label).size(16),
            horizontal_space(),
            text(data.elapsed.clone()).size(32),
        ]
        .align_y(Alignment::Center),
        controls,
    ]
    .spacing(10)
    .padding(15);

    if let Some(status) = &data.status {
        panel = panel.push(text(status.clone()).size(14));
    }

    container(panel).width(Length::Fill).into()
}

/// Exercise list, tone control and exit.
fn create_sidebar(data: &AppDisplayData) -> Element<'static, Message> {
    let exercises = EXERCISES.iter().fold(column![].spacing(8), |col, &(id, label)| {
        let message = data.output_available.then_some(Message::PlayReference(id));
        let accent = (data.active_exercise == Some(id)).then_some(ACTIVE_COLOR);
        col.push(make_button(label, message, accent))
    });

    let stop_tone = make_button(
        "Stop tone",
        data.tone_playing.then_some(Message::StopTone),
        None,
    );

    let mut sections = column![
        text("Exercises").size(18),
        Space::with_height(10),
        exercises,
        Space::with_height(10),
        text("Reference tone").size(18),
        stop_tone,
    ]
    .spacing(5);

    if !data.output_available {
        sections = sections.push(text("No speaker found").size(14));
    }

    sections = sections
        .push(Space::with_height(20))
        .push(text("Program").size(18))
        .push(make_button("Exit", Some(Message::Exit), None));

    container(sections.padding(15))
        .width(Length::Fixed(250.0))
        .height(Length::Fill)
        .into()
}

/// Creates a sidebar or control button. Buttons without a message are
/// drawn greyed out and ignore presses.
fn make_button(
    label: &'static str,
    message: Option<Message>,
    accent: Option<Color>,
) -> Element<'static, Message> {
    let mut button = button(text(label).size(14).width(Length::Fill)).padding([6, 10]);

    if message.is_none() {
        button = button.style(|_theme, _status| {
            use iced::widget::button;
            button::Style {
                background: Some(iced::Background::Color(Color::from_rgb(0.3, 0.3, 0.3))),
                text_color: Color::from_rgb(0.6, 0.6, 0.6),
                ..button::Style::default()
            }
        });
    } else if let Some(color) = accent {
        button = button.style(move |_theme, _status| {
            use iced::widget::button;
            button::Style {
                background: Some(iced::Background::Color(color)),
                text_color: Color::WHITE,
                ..button::Style::default()
            }
        });
    }

    button.on_press_maybe(message).into()
}
