use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use crate::report::AnalysisReport;
use cwnd_lab_abstract::ChartSpec;
use crossterm::{
    event::{self, Event, KeyCode},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, List, ListItem, Paragraph},
};

const LOG_CAPACITY: usize = 1000;
const SERIES_COLORS: [Color; 5] = [
    Color::Cyan,
    Color::Yellow,
    Color::Green,
    Color::Magenta,
    Color::Blue,
];

/// A tracing writer that keeps recent log lines for display in the viewer.
#[derive(Clone, Default)]
pub struct MemoryLogBuffer {
    logs: Arc<Mutex<VecDeque<String>>>,
}

impl MemoryLogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, msg: String) {
        let mut logs = self.logs.lock().unwrap_or_else(PoisonError::into_inner);
        logs.push_back(msg);
        if logs.len() > LOG_CAPACITY {
            logs.pop_front();
        }
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl io::Write for MemoryLogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let s = s.trim();
        if !s.is_empty() {
            self.push(s.to_string());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum View {
    Cwnd,
    Bandwidth,
}

/// Interactive view of a finished analysis.
pub struct ReportViewer {
    report: AnalysisReport,
    cwnd: Option<ChartSpec>,
    bandwidth: Option<ChartSpec>,
    logs: MemoryLogBuffer,
    view: View,
    log_scroll: usize,
}

impl ReportViewer {
    pub fn new(report: AnalysisReport, logs: MemoryLogBuffer, title: Option<&str>) -> Self {
        let cwnd = report.cwnd_chart(title);
        let bandwidth = report.bandwidth_chart(title);
        let view = if cwnd.is_none() && bandwidth.is_some() {
            View::Bandwidth
        } else {
            View::Cwnd
        };
        Self {
            report,
            cwnd,
            bandwidth,
            logs,
            view,
            log_scroll: 0,
        }
    }

    pub fn run(&mut self) -> anyhow::Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let tick_rate = Duration::from_millis(200);
        loop {
            terminal.draw(|f| self.ui(f))?;

            if event::poll(tick_rate)?
                && let Event::Key(key) = event::read()?
            {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Tab | KeyCode::Char('c') | KeyCode::Char('b') => self.toggle_view(),
                    KeyCode::Up => self.log_scroll = self.log_scroll.saturating_add(1),
                    KeyCode::Down => self.log_scroll = self.log_scroll.saturating_sub(1),
                    _ => {}
                }
            }
        }

        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        Ok(())
    }

    fn toggle_view(&mut self) {
        self.view = match self.view {
            View::Cwnd => View::Bandwidth,
            View::Bandwidth => View::Cwnd,
        };
    }

    fn ui(&self, f: &mut Frame) {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),  // Control bar
                Constraint::Min(0),     // Scorecard + chart
                Constraint::Length(8),  // Logs
            ])
            .split(f.area());

        self.render_control(f, rows[0]);

        let mid = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
            .split(rows[1]);
        self.render_scorecard(f, mid[0]);
        let chart = match self.view {
            View::Cwnd => self.cwnd.as_ref(),
            View::Bandwidth => self.bandwidth.as_ref(),
        };
        render_chart(f, mid[1], chart);

        self.render_logs(f, rows[2]);
    }

    fn render_control(&self, f: &mut Frame, area: Rect) {
        let name = self.report.name.as_deref().unwrap_or("Ad-hoc Analysis");
        let window = self
            .report
            .window
            .map(|w| format!("{:.1} s", w.duration()))
            .unwrap_or_else(|| "-".into());
        let text = format!(
            "Experiment: {name} | Window: {window} | View: {} | (tab)switch chart (up/down)scroll logs (q)uit",
            match self.view {
                View::Cwnd => "cwnd",
                View::Bandwidth => "bandwidth",
            }
        );
        let block =
            Paragraph::new(text).block(Block::default().borders(Borders::ALL).title("Control"));
        f.render_widget(block, area);
    }

    fn render_scorecard(&self, f: &mut Frame, area: Rect) {
        let mut text = vec![Line::from("Throughput:")];
        let scorecard = self.report.scorecard_lines();
        if scorecard.is_empty() {
            text.push(Line::from("  no flows"));
        }
        text.extend(scorecard.into_iter().map(|l| Line::from(format!("  {l}"))));

        text.push(Line::from(""));
        text.push(Line::from("cwnd samples:"));
        match self.report.cwnd.reduction() {
            Some(r) => {
                text.push(Line::from(format!("  lines:          {}", r.stats.lines)));
                text.push(Line::from(format!("  kept:           {}", r.stats.kept)));
                text.push(Line::from(format!("  malformed:      {}", r.stats.malformed)));
                text.push(Line::from(format!("  too few values: {}", r.stats.insufficient)));
                text.push(Line::from(format!("  outside window: {}", r.stats.out_of_window)));
                if let Some(max) = r.records.iter().map(|c| c.cwnd).max() {
                    text.push(Line::from(format!("  peak cwnd:      {max}")));
                }
            }
            None => text.push(Line::from("  none")),
        }

        let block = Paragraph::new(text)
            .block(Block::default().borders(Borders::ALL).title("Scorecard"));
        f.render_widget(block, area);
    }

    fn render_logs(&self, f: &mut Frame, area: Rect) {
        let logs = self.logs.snapshot();
        let visible = area.height.saturating_sub(2) as usize;
        let end = logs.len().saturating_sub(self.log_scroll);
        let start = end.saturating_sub(visible);
        let items: Vec<ListItem> = logs[start..end]
            .iter()
            .map(|l| ListItem::new(l.as_str()))
            .collect();
        let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Log"));
        f.render_widget(list, area);
    }
}

fn render_chart(f: &mut Frame, area: Rect, chart: Option<&ChartSpec>) {
    let Some(chart) = chart else {
        let block = Paragraph::new("No valid data")
            .block(Block::default().borders(Borders::ALL).title("Chart"));
        f.render_widget(block, area);
        return;
    };
    let Some((x_range, y_range)) = crate::render::plot_ranges(chart) else {
        return;
    };

    // Reference lines become two-point series spanning the x range.
    let references: Vec<[(f64, f64); 2]> = chart
        .reference_lines
        .iter()
        .map(|r| [(x_range.start, r.y), (x_range.end, r.y)])
        .collect();

    let mut datasets: Vec<Dataset> = chart
        .series
        .iter()
        .enumerate()
        .map(|(idx, series)| {
            Dataset::default()
                .name(series.label.as_str())
                .marker(symbols::Marker::Braille)
                .style(Style::default().fg(SERIES_COLORS[idx % SERIES_COLORS.len()]))
                .graph_type(GraphType::Line)
                .data(&series.points)
        })
        .collect();
    for (reference, points) in chart.reference_lines.iter().zip(&references) {
        datasets.push(
            Dataset::default()
                .name(reference.label.as_str())
                .marker(symbols::Marker::Dot)
                .style(Style::default().fg(Color::Red).add_modifier(Modifier::DIM))
                .graph_type(GraphType::Line)
                .data(points),
        );
    }

    let x_labels = vec![
        Span::raw(format!("{:.1}", x_range.start)),
        Span::raw(""),
        Span::raw(format!("{:.1}", x_range.end)),
    ];
    let y_labels = vec![
        Span::raw(format!("{:.0}", y_range.start)),
        Span::raw(""),
        Span::raw(format!("{:.0}", y_range.end)),
    ];

    let widget = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(chart.title.as_str()),
        )
        .x_axis(
            Axis::default()
                .title(chart.x_label.as_str())
                .bounds([x_range.start, x_range.end])
                .labels(x_labels),
        )
        .y_axis(
            Axis::default()
                .title(chart.y_label.as_str())
                .bounds([y_range.start, y_range.end])
                .labels(y_labels),
        );
    f.render_widget(widget, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn log_buffer_keeps_recent_lines() {
        let mut buffer = MemoryLogBuffer::new();
        for i in 0..(LOG_CAPACITY + 5) {
            buffer.write_all(format!("line {i}\n").as_bytes()).unwrap();
        }
        buffer.write_all(b"\n").unwrap();
        let logs = buffer.snapshot();
        assert_eq!(logs.len(), LOG_CAPACITY);
        assert_eq!(logs[0], "line 5");
        assert_eq!(logs[LOG_CAPACITY - 1], format!("line {}", LOG_CAPACITY + 4));
    }
}
