//! Execution Timeline
//!
//! Records when each task of a run starts, finishes, fails or is skipped,
//! for the end-of-run report.

use std::time::{Duration, Instant};

use indexmap::IndexMap;

/// Width of the task-name column in the chart.
const LABEL_WIDTH: usize = 28;

/// Width of the bar area in the chart.
const CHART_WIDTH: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Started,
    Completed,
    Failed,
    /// Already complete in the ledger
    Skipped,
}

#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub task: String,
    /// Iteration the task ran in, for iterative variants
    pub iteration: Option<usize>,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Events of one or more runs, in the order they happened.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
    iteration: Option<usize>,
}

impl ExecutionTimeline {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
            iteration: None,
        }
    }

    /// Tags subsequent events with `iteration`.
    pub fn set_iteration(&mut self, iteration: Option<usize>) {
        self.iteration = iteration;
    }

    pub fn add_event(&mut self, task: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            task: task.into(),
            iteration: self.iteration,
            event_type,
            timestamp: Instant::now(),
        });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of events of the given type.
    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    /// Duration of every finished task attempt, keyed by its label, in
    /// start order. Iterative runs label tasks `name@iteration`.
    pub fn durations(&self) -> IndexMap<String, Duration> {
        let mut starts: IndexMap<String, Instant> = IndexMap::new();
        let mut durations = IndexMap::new();

        for event in &self.events {
            let label = label(event);
            match event.event_type {
                EventType::Started => {
                    starts.insert(label, event.timestamp);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.get(&label) {
                        durations.insert(label, event.timestamp.duration_since(*start));
                    }
                }
                EventType::Skipped => {}
            }
        }

        durations
    }

    /// Renders a text chart with one bar per executed task and a line per
    /// skipped one.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total = self.elapsed().as_millis();
        if self.events.is_empty() || total == 0 {
            return output;
        }
        let scale = CHART_WIDTH / total as f64;

        let mut bars: IndexMap<String, (u128, Option<u128>, bool)> = IndexMap::new();
        for event in &self.events {
            let at = event.timestamp.duration_since(self.start_time).as_millis();
            let label = label(event);
            match event.event_type {
                EventType::Started => {
                    bars.insert(label, (at, None, false));
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(bar) = bars.get_mut(&label) {
                        bar.1 = Some(at);
                        bar.2 = event.event_type == EventType::Failed;
                    }
                }
                EventType::Skipped => {
                    output.push_str(&format!("{} | skipped\n", pad(&label, LABEL_WIDTH)));
                }
            }
        }

        for (label, (start, end, failed)) in bars {
            let Some(end) = end else {
                continue;
            };
            let offset = (start as f64 * scale) as usize;
            let width = ((end - start) as f64 * scale).max(1.0) as usize;
            let fill = if failed { "x" } else { "#" };

            output.push_str(&format!(
                "{} |{}{}| ({} ms)\n",
                pad(&label, LABEL_WIDTH),
                " ".repeat(offset),
                fill.repeat(width),
                end - start
            ));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total));
        output
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

fn label(event: &TimelineEvent) -> String {
    match event.iteration {
        Some(iteration) => format!("{}@{}", event.task, iteration),
        None => event.task.clone(),
    }
}

/// Pads or shortens `s` to exactly `width` characters.
fn pad(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        format!("{:width$}", s, width = width)
    } else {
        let kept: String = s.chars().take(width - 3).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_durations_in_start_order() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("generate_synthetic_data", EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.add_event("generate_synthetic_data", EventType::Completed);
        timeline.add_event("evaluate_initial_misfit", EventType::Started);
        timeline.add_event("evaluate_initial_misfit", EventType::Failed);

        let durations = timeline.durations();
        let names: Vec<_> = durations.keys().cloned().collect();
        assert_eq!(names, vec!["generate_synthetic_data", "evaluate_initial_misfit"]);
        assert!(durations["generate_synthetic_data"] >= Duration::from_millis(20));
    }

    #[test]
    fn test_skipped_and_unfinished_tasks_have_no_duration() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("a", EventType::Skipped);
        timeline.add_event("b", EventType::Started);

        assert!(timeline.durations().is_empty());
        assert_eq!(timeline.count(EventType::Skipped), 1);
        assert_eq!(timeline.count(EventType::Started), 1);
    }

    #[test]
    fn test_iterations_are_labelled() {
        let mut timeline = ExecutionTimeline::new();
        for iteration in 1..=2 {
            timeline.set_iteration(Some(iteration));
            timeline.add_event("perform_line_search", EventType::Started);
            timeline.add_event("perform_line_search", EventType::Completed);
        }

        let durations = timeline.durations();
        assert!(durations.contains_key("perform_line_search@1"));
        assert!(durations.contains_key("perform_line_search@2"));
        assert_eq!(timeline.events()[2].iteration, Some(2));
    }

    #[test]
    fn test_gantt_chart() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("generate_synthetic_data", EventType::Skipped);
        timeline.add_event("evaluate_initial_misfit", EventType::Started);
        thread::sleep(Duration::from_millis(30));
        timeline.add_event("evaluate_initial_misfit", EventType::Completed);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("generate_synthetic_data"));
        assert!(chart.contains("skipped"));
        assert!(chart.contains("evaluate_initial_misfit"));
        assert!(chart.contains('#'));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let chart = ExecutionTimeline::new().gantt_chart();
        assert!(chart.contains("Timeline"));
        assert!(!chart.contains("Total:"));
    }

    #[test]
    fn test_pad() {
        assert_eq!(pad("abc", 5), "abc  ");
        assert_eq!(pad("abcdefgh", 6), "abc...");
    }
}
