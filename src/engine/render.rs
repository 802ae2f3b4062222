//! Offline rendering
//!
//! Produces the audio the output would play for a window of clock time:
//! scheduled clicks through the metronome stage, track voices through the
//! master stage, and live monitoring through the monitor stage. Used by
//! the CLI to bounce click tracks and by tests to check what is audible.

use crate::engine::buffer::{AudioBuffer, ChannelLayout};
use crate::engine::graph::{GainGraph, Stage};
use crate::engine::playback::TrackPlayback;
use crate::engine::timeline::{EventKind, EventQueue};

/// Square wave in [-1, 1]
#[inline]
fn square(phase: f64) -> f32 {
    if phase.fract() < 0.5 {
        1.0
    } else {
        -1.0
    }
}

/// Render `frames` stereo frames starting at clock time `start`
///
/// `monitor` holds processed microphone samples aligned with the first
/// frame; it may be shorter than the block.
pub fn render_block(
    start: f64,
    frames: usize,
    sample_rate: u32,
    queue: &EventQueue,
    playback: &TrackPlayback,
    graph: &GainGraph,
    monitor: &[f32],
) -> AudioBuffer {
    let mut out = AudioBuffer::new(frames, ChannelLayout::Stereo);
    out.sample_rate = sample_rate;
    if frames == 0 || sample_rate == 0 {
        return out;
    }

    let rate = sample_rate as f64;
    let end = start + frames as f64 / rate;
    let click_gain = graph.path_gain(Stage::Metronome);
    let track_gain = graph.path_gain(Stage::Master);

    for event in queue.overlapping(start, end) {
        if event.is_cancelled() {
            continue;
        }
        let first = (((event.at - start) * rate).ceil().max(0.0)) as usize;
        let last = (((event.end() - start) * rate).ceil().max(0.0) as usize).min(frames);

        match &event.kind {
            EventKind::Click(click) if click_gain > 0.0 => {
                let gain = click.gain * click_gain;
                for i in first..last {
                    let t = start + i as f64 / rate - event.at;
                    let value = square(t * click.frequency as f64) * gain;
                    for channel in out.samples.iter_mut() {
                        channel[i] += value;
                    }
                }
            }
            EventKind::TrackStart(_) if track_gain > 0.0 => {
                let Some(voice) = playback.voice(event.id) else {
                    continue;
                };
                let buffer = &voice.buffer;
                if buffer.channels() == 0 {
                    continue;
                }
                let step = buffer.sample_rate as f64;
                for i in first..last {
                    let t = start + i as f64 / rate - event.at;
                    let index = (t * step) as usize;
                    for (ch, channel) in out.samples.iter_mut().enumerate() {
                        if let Some(sample) = buffer.get_sample(ch % buffer.channels(), index) {
                            channel[i] += sample * track_gain;
                        }
                    }
                }
            }
            _ => {}
        }
    }

    let monitor_gain = if graph.is_audible(Stage::Sensitivity) {
        graph.path_gain(Stage::Monitor)
    } else {
        0.0
    };
    if monitor_gain > 0.0 {
        for (i, &sample) in monitor.iter().take(frames).enumerate() {
            for channel in out.samples.iter_mut() {
                channel[i] += sample * monitor_gain;
            }
        }
    }

    out.clamp();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::timeline::Click;

    fn click_at(queue: &mut EventQueue, at: f64) {
        queue.enqueue(
            at,
            EventKind::Click(Click {
                beat: 0,
                downbeat: true,
                frequency: 1000.0,
                gain: 0.5,
                duration_secs: 0.01,
            }),
        );
    }

    #[test]
    fn test_click_lands_at_its_frame() {
        let mut queue = EventQueue::new();
        click_at(&mut queue, 0.5);
        let graph = GainGraph::new(1.0, 1.0, 1.0, 1.0);
        let playback = TrackPlayback::new(0.05);

        let out = render_block(0.0, 48000, 48000, &queue, &playback, &graph, &[]);
        let first = out.channel(0).iter().position(|s| *s != 0.0).unwrap();
        assert_eq!(first, 24000);
        assert!((out.peak() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_metronome_stage_scales_clicks() {
        let mut queue = EventQueue::new();
        click_at(&mut queue, 0.0);
        let graph = GainGraph::new(0.5, 0.5, 1.0, 1.0);
        let playback = TrackPlayback::new(0.05);

        let out = render_block(0.0, 480, 48000, &queue, &playback, &graph, &[]);
        assert!((out.peak() - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_cancelled_click_is_silent() {
        let mut queue = EventQueue::new();
        click_at(&mut queue, 0.1);
        queue.stop_source(crate::engine::timeline::EventSource::Metronome, 0.0);
        let graph = GainGraph::default();
        let playback = TrackPlayback::new(0.05);

        let out = render_block(0.0, 9600, 48000, &queue, &playback, &graph, &[]);
        assert_eq!(out.peak(), 0.0);
    }

    #[test]
    fn test_monitor_needs_connected_input() {
        let queue = EventQueue::new();
        let mut graph = GainGraph::new(1.0, 1.0, 0.5, 1.0);
        let playback = TrackPlayback::new(0.05);
        let monitor = vec![0.8; 10];

        let silent = render_block(0.0, 10, 48000, &queue, &playback, &graph, &monitor);
        assert_eq!(silent.peak(), 0.0);

        graph.connect_input();
        let heard = render_block(0.0, 10, 48000, &queue, &playback, &graph, &monitor);
        assert!((heard.peak() - 0.4).abs() < 1e-6);
    }
}
