//! # Pitch Meter Widget
//!
//! A horizontal meter showing how far the sung pitch is from the target.
//! The in-tune and close bands are shaded behind the needle, and the
//! needle takes the colour of the band it falls in.

use iced::widget::canvas::{self, Geometry, Path, Stroke};
use iced::widget::container;
use iced::{Color, Element, Point, Rectangle, Renderer, Size, Theme, mouse};
use trainer_core::music::FeedbackZone;

/// The meter spans one semitone either side of the target.
const METER_RANGE: f32 = 100.0;

const IN_TUNE_COLOR: Color = Color { r: 0.20, g: 0.86, b: 0.60, a: 1.0 };
const CLOSE_COLOR: Color = Color { r: 1.0, g: 0.76, b: 0.0, a: 1.0 };
const OFF_COLOR: Color = Color { r: 1.0, g: 0.20, b: 0.20, a: 1.0 };

pub fn zone_color(zone: FeedbackZone) -> Color {
    match zone {
        FeedbackZone::InTune => IN_TUNE_COLOR,
        FeedbackZone::Close => CLOSE_COLOR,
        FeedbackZone::Off => OFF_COLOR,
    }
}

/// Cent offset meter with feedback bands.
pub struct PitchMeter {
    /// Smoothed offset from the target (None when nothing is sung)
    cents: Option<f64>,
    in_tune_cents: f64,
    close_cents: f64,
}

impl PitchMeter {
    pub fn new(cents: Option<f64>, in_tune_cents: f64, close_cents: f64) -> Self {
        Self {
            cents,
            in_tune_cents,
            close_cents,
        }
    }

    pub fn view(self) -> Element<'static, crate::Message> {
        container(
            canvas::Canvas::new(self)
                .width(iced::Length::Fill)
                .height(iced::Length::Fixed(80.0)),
        )
        .into()
    }

    /// Horizontal position of a cent offset, clamped to the meter.
    fn x_for(cents: f32, width: f32) -> f32 {
        let clamped = cents.clamp(-METER_RANGE, METER_RANGE);
        (clamped + METER_RANGE) / (2.0 * METER_RANGE) * width
    }

    fn fill_band(&self, frame: &mut canvas::Frame, half_width: f64, color: Color, bounds: Size) {
        let half_width = half_width as f32;
        let left = Self::x_for(-half_width, bounds.width);
        let right = Self::x_for(half_width, bounds.width);
        let band = Path::rectangle(
            Point::new(left, 0.0),
            Size::new(right - left, bounds.height),
        );
        frame.fill(&band, color);
    }
}

impl<Message> canvas::Program<Message> for PitchMeter {
    type State = ();

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: mouse::Cursor,
    ) -> Vec<Geometry> {
        let mut frame = canvas::Frame::new(renderer, bounds.size());

        let background = Path::rectangle(Point::ORIGIN, bounds.size());
        frame.fill(&background, Color::from_rgb8(0x40, 0x40, 0x40));

        // Close band first so the in-tune band paints over its middle.
        self.fill_band(
            &mut frame,
            self.close_cents,
            Color { a: 0.18, ..CLOSE_COLOR },
            bounds.size(),
        );
        self.fill_band(
            &mut frame,
            self.in_tune_cents,
            Color { a: 0.25, ..IN_TUNE_COLOR },
            bounds.size(),
        );

        let center_x = bounds.width / 2.0;
        let center_line = Path::line(
            Point::new(center_x, 0.0),
            Point::new(center_x, bounds.height),
        );
        frame.stroke(
            &center_line,
            Stroke::default().with_width(2.0).with_color(Color::WHITE),
        );

        if let Some(cents) = self.cents {
            let zone = FeedbackZone::classify(cents, self.in_tune_cents, self.close_cents);
            let needle_x = Self::x_for(cents as f32, bounds.width);
            let needle = Path::rectangle(
                Point::new(needle_x - 2.0, 0.0),
                Size::new(4.0, bounds.height),
            );
            frame.fill(&needle, zone_color(zone));
        }

        vec![frame.into_geometry()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needle_position_is_clamped_to_the_meter() {
        assert_eq!(PitchMeter::x_for(0.0, 200.0), 100.0);
        assert_eq!(PitchMeter::x_for(-METER_RANGE, 200.0), 0.0);
        assert_eq!(PitchMeter::x_for(500.0, 200.0), 200.0);
    }
}
