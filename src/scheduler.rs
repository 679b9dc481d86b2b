//! Greedy shift construction.
//!
//! Services are placed one at a time, most constrained first, into the
//! best-scoring slot of an existing shift; failing that a new shift is
//! opened for a free technician, and failing that a new technician is
//! hired up to `max_technicians`. After each placement the shift is
//! extended with compatible services from the queue, and a final pass
//! merges shifts that fit together.
//!
//! Services live in an arena and shifts refer to them by index, so no
//! service record is copied while shifts are built and merged.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use tracing::{debug, info, instrument, warn};

use crate::aggregate::aggregate;
use crate::config::ScheduleOptions;
use crate::context::RunContext;
use crate::error::Result;
use crate::matrix::DistanceMatrix;
use crate::model::{ScheduleResult, ScheduledService, Service, Shift, UnscheduledReason, UnscheduledService};
use crate::traits::BoroughClassifier;

/// Shifts and leftovers produced by one scheduler.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleOutcome {
    pub shifts: Vec<Shift>,
    pub unscheduled: Vec<UnscheduledService>,
    pub enforced_conflicts: usize,
}

/// Schedules `services` (already prepared and ordered) in one group.
#[instrument(skip_all, fields(services = services.len()))]
pub fn schedule_shifts(
    services: &[Service],
    matrix: &DistanceMatrix,
    boroughs: &dyn BoroughClassifier,
    options: &ScheduleOptions,
    ctx: &RunContext,
) -> Result<ScheduleResult> {
    let started = Instant::now();
    let mut scheduler = ShiftScheduler::new(services, matrix, boroughs, options, ctx)?;
    scheduler.schedule_all()?;
    let outcome = scheduler.finish();
    Ok(aggregate(&outcome, &[], None, started.elapsed()))
}

#[derive(Debug, Clone)]
struct Entry {
    service: Service,
    slot: Option<usize>,
    borough: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct Placement {
    service: usize,
    start: NaiveDateTime,
    end: NaiveDateTime,
}

#[derive(Debug, Clone)]
struct ShiftState {
    tech: usize,
    cluster: Option<usize>,
    day: NaiveDate,
    /// Sorted by start.
    placements: Vec<Placement>,
    alive: bool,
}

impl ShiftState {
    fn span(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let start = self.placements.first()?.start;
        let end = self.placements.iter().map(|p| p.end).max()?;
        Some((start, end))
    }

    fn span_length(&self) -> TimeDelta {
        self.span().map_or(TimeDelta::zero(), |(start, end)| end - start)
    }
}

#[derive(Debug, Clone)]
struct Technician {
    id: String,
    generated: bool,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    shift: usize,
    start: NaiveDateTime,
    score: f64,
}

/// Scheduling state for one run.
pub struct ShiftScheduler<'a> {
    options: &'a ScheduleOptions,
    matrix: &'a DistanceMatrix,
    ctx: &'a RunContext,
    entries: Vec<Entry>,
    shifts: Vec<ShiftState>,
    technicians: Vec<Technician>,
    tech_by_code: HashMap<String, usize>,
    generated: usize,
    unscheduled: Vec<(usize, UnscheduledReason)>,
    enforced_conflicts: usize,
    processed: usize,
}

impl<'a> ShiftScheduler<'a> {
    pub fn new(
        services: &[Service],
        matrix: &'a DistanceMatrix,
        boroughs: &dyn BoroughClassifier,
        options: &'a ScheduleOptions,
        ctx: &'a RunContext,
    ) -> Result<Self> {
        options.validate()?;

        let entries = services
            .iter()
            .map(|service| Entry {
                slot: matrix.index_of(&service.location_id),
                borough: service
                    .borough
                    .clone()
                    .or_else(|| boroughs.borough(service.coordinates)),
                service: service.clone(),
            })
            .collect();

        Ok(Self {
            options,
            matrix,
            ctx,
            entries,
            shifts: Vec::new(),
            technicians: Vec::new(),
            tech_by_code: HashMap::new(),
            generated: 0,
            unscheduled: Vec::new(),
            enforced_conflicts: 0,
            processed: 0,
        })
    }

    pub fn service_count(&self) -> usize {
        self.entries.len()
    }

    /// Schedules every service as a single group.
    pub fn schedule_all(&mut self) -> Result<()> {
        let members: Vec<usize> = (0..self.entries.len()).collect();
        self.schedule_group(&members, None)
    }

    /// Schedules the services at `members` (arena indices, in priority
    /// order). Shifts opened here only accept services of the same group.
    pub fn schedule_group(&mut self, members: &[usize], cluster: Option<usize>) -> Result<()> {
        let (pinned, free): (Vec<usize>, Vec<usize>) = members
            .iter()
            .copied()
            .filter(|&i| i < self.entries.len())
            .partition(|&i| self.entries[i].service.enforced);

        for i in pinned {
            self.ctx.checkpoint()?;
            self.place_enforced(i, cluster);
            self.processed += 1;
            self.report();
        }

        let mut queue: VecDeque<usize> = free.into();
        while let Some(i) = queue.pop_front() {
            self.ctx.checkpoint()?;
            self.processed += 1;
            if let Some(shift) = self.place(i, cluster) {
                self.extend(shift, i, &mut queue);
            }
            self.report();
        }

        self.merge_pass(cluster)?;
        debug!(
            ?cluster,
            members = members.len(),
            shifts = self.shifts.iter().filter(|s| s.alive).count(),
            "group scheduled"
        );
        Ok(())
    }

    pub fn finish(self) -> ScheduleOutcome {
        let mut names: HashMap<usize, String> = HashMap::new();
        let mut numbered = 0usize;
        let mut shifts = Vec::new();

        for state in self.shifts.iter().filter(|s| s.alive && !s.placements.is_empty()) {
            let technician = &self.technicians[state.tech];
            let tech_id = if technician.generated {
                names
                    .entry(state.tech)
                    .or_insert_with(|| self.generated_name(&mut numbered))
                    .clone()
            } else {
                technician.id.clone()
            };

            let id = shifts.len();
            let mut services = Vec::with_capacity(state.placements.len());
            let mut previous: Option<usize> = None;
            for (sequence, placement) in state.placements.iter().enumerate() {
                let distance = previous.and_then(|prev| self.distance(prev, placement.service));
                services.push(ScheduledService {
                    service: self.entries[placement.service].service.clone(),
                    start: placement.start,
                    end: placement.end,
                    shift_id: id,
                    tech_id: tech_id.clone(),
                    cluster: state.cluster,
                    sequence,
                    distance_from_previous: distance,
                    travel_minutes_from_previous: distance.map(|d| self.options.travel_minutes(d)),
                });
                previous = Some(placement.service);
            }

            if let Some((shift_start, shift_end)) = state.span() {
                shifts.push(Shift {
                    id,
                    tech_id,
                    cluster: state.cluster,
                    services,
                    shift_start,
                    shift_end,
                });
            }
        }

        let unscheduled: Vec<UnscheduledService> = self
            .unscheduled
            .iter()
            .map(|&(i, reason)| UnscheduledService::new(self.entries[i].service.clone(), reason))
            .collect();

        info!(
            shifts = shifts.len(),
            technicians = self.technicians.iter().filter(|t| !t.generated).count() + names.len(),
            unscheduled = unscheduled.len(),
            enforced_conflicts = self.enforced_conflicts,
            "scheduling finished"
        );

        ScheduleOutcome {
            shifts,
            unscheduled,
            enforced_conflicts: self.enforced_conflicts,
        }
    }

    fn report(&self) {
        self.ctx.report_band(0.0, 0.9, self.processed, self.entries.len());
    }

    // ------------------------------------------------------------------
    // Placement
    // ------------------------------------------------------------------

    fn place(&mut self, i: usize, cluster: Option<usize>) -> Option<usize> {
        if self.entries[i].service.duration_minutes > self.options.max_shift_duration_minutes {
            self.unscheduled.push((i, UnscheduledReason::ExceedsShiftDuration));
            return None;
        }

        if let Some(candidate) = self.best_existing(i, cluster) {
            self.insert(candidate.shift, i, candidate.start);
            return Some(candidate.shift);
        }

        let start = self.entries[i].service.preferred_time;
        let day = self.entries[i].service.day();

        let free_tech = (0..self.technicians.len())
            .find(|&t| self.technicians[t].generated && !self.works_on(t, day));
        if let Some(tech) = free_tech {
            return Some(self.open_shift(tech, cluster, i, start));
        }

        if self.generated < self.options.max_technicians {
            let tech = self.hire();
            return Some(self.open_shift(tech, cluster, i, start));
        }

        debug!(service_id = %self.entries[i].service.id, "no shift or technician available");
        self.unscheduled.push((i, UnscheduledReason::TechnicianCapReached));
        None
    }

    fn place_enforced(&mut self, i: usize, cluster: Option<usize>) {
        let service = &self.entries[i].service;
        if service.duration_minutes > self.options.max_shift_duration_minutes {
            self.unscheduled.push((i, UnscheduledReason::ExceedsShiftDuration));
            return;
        }

        let code = service.tech_code.clone().unwrap_or_default();
        let start = service.preferred_time;
        let end = end_time(start, service.duration_minutes);
        let day = service.day();

        let tech = self.tech_for_code(&code);
        let hosts: Vec<usize> = (0..self.shifts.len())
            .filter(|&h| self.shifts[h].alive && self.shifts[h].tech == tech && self.shifts[h].day == day)
            .collect();
        for h in hosts {
            if self.distances_allowed(h, i) && self.evaluate(h, i, start).is_some() {
                self.insert(h, i, start);
                return;
            }
        }

        if !self.tech_busy(tech, start, end, &[]) {
            self.open_shift(tech, cluster, i, start);
            return;
        }

        warn!(
            service_id = %self.entries[i].service.id,
            tech = %code,
            %start,
            "pinned service conflicts with the technician's schedule"
        );
        self.enforced_conflicts += 1;
        self.unscheduled.push((i, UnscheduledReason::EnforcedConflict));
    }

    fn best_existing(&self, i: usize, cluster: Option<usize>) -> Option<Candidate> {
        let day = self.entries[i].service.day();
        let mut best: Option<Candidate> = None;

        for (h, shift) in self.shifts.iter().enumerate() {
            if !shift.alive
                || shift.cluster != cluster
                || shift.day != day
                || shift.placements.len() >= self.options.max_points_per_shift
            {
                continue;
            }
            if let Some((start, score)) = self.best_start_in(h, i) {
                if best.is_none_or(|b| score > b.score) {
                    best = Some(Candidate { shift: h, start, score });
                }
            }
        }
        best
    }

    /// Best start time for service `i` in shift `h`, with its score.
    fn best_start_in(&self, h: usize, i: usize) -> Option<(NaiveDateTime, f64)> {
        let shift = &self.shifts[h];
        if shift.placements.len() >= self.options.max_points_per_shift
            || shift.day != self.entries[i].service.day()
            || !self.distances_allowed(h, i)
        {
            return None;
        }

        let mut best: Option<(NaiveDateTime, f64)> = None;
        for start in self.candidate_starts(i) {
            if let Some(score) = self.evaluate(h, i, start) {
                if best.is_none_or(|(_, s)| score > s) {
                    best = Some((start, score));
                }
            }
        }
        best
    }

    /// Start times across the window in `step_minutes` increments, latest included.
    fn candidate_starts(&self, i: usize) -> Vec<NaiveDateTime> {
        let window = self.entries[i].service.time_window;
        let step = minutes(self.options.step_minutes);
        let mut starts = Vec::new();
        let mut at = window.earliest;
        while at <= window.latest {
            starts.push(at);
            let Some(next) = at.checked_add_signed(step) else {
                break;
            };
            at = next;
        }
        if starts.last() != Some(&window.latest) {
            starts.push(window.latest);
        }
        starts
    }

    /// Score of placing `i` at `start` in shift `h`, or `None` when a time,
    /// duration, travel or technician constraint fails. Pairwise radius is
    /// checked separately by [`Self::distances_allowed`].
    fn evaluate(&self, h: usize, i: usize, start: NaiveDateTime) -> Option<f64> {
        let shift = &self.shifts[h];
        let duration = self.entries[i].service.duration_minutes;
        if duration > self.options.max_shift_duration_minutes {
            return None;
        }
        let end = end_time(start, duration);

        let (span_start, span_end) = match shift.span() {
            Some((first, last)) => (first.min(start), last.max(end)),
            None => (start, end),
        };
        let span = span_end - span_start;
        if span > minutes(self.options.max_shift_duration_minutes) {
            return None;
        }

        let mut previous: Option<&Placement> = None;
        let mut next: Option<&Placement> = None;
        for placement in &shift.placements {
            if overlaps(start, end, placement.start, placement.end) {
                return None;
            }
            if placement.end <= start {
                if previous.is_none_or(|p| placement.end > p.end) {
                    previous = Some(placement);
                }
            } else if next.is_none_or(|n| placement.start < n.start) {
                next = Some(placement);
            }
        }

        let mut hop = None;
        if let Some(p) = previous {
            let miles = self.distance(p.service, i)?;
            let gap = minutes_between(p.end, start);
            let travel = self.options.travel_minutes(miles);
            if gap < travel {
                return None;
            }
            hop = Some((miles, gap - travel));
        }
        if let Some(n) = next {
            let miles = self.distance(i, n.service)?;
            let gap = minutes_between(end, n.start);
            let travel = self.options.travel_minutes(miles);
            if gap < travel {
                return None;
            }
            if hop.is_none() {
                hop = Some((miles, gap - travel));
            }
        }

        if self.tech_busy(shift.tech, start, end, &[h]) {
            return None;
        }

        let (miles, idle) = hop.unwrap_or((0.0, 0.0));
        Some(self.score(h, i, miles, idle, span.num_minutes()))
    }

    fn score(&self, h: usize, i: usize, miles: f64, idle_minutes: f64, span_minutes: i64) -> f64 {
        let weights = &self.options.weights;
        let service = &self.entries[i].service;
        let width_hours = (service.time_window.width_minutes() as f64 / 60.0).max(0.25);
        let capped_span = span_minutes.min(self.options.max_shift_duration_minutes) as f64;
        let same_location = self.shifts[h]
            .placements
            .iter()
            .any(|p| self.entries[p.service].service.location_id == service.location_id);

        -weights.distance * (miles / self.options.hard_max_radius_miles).powi(2)
            - weights.gap * (idle_minutes.max(0.0) / 60.0).powf(1.5)
            + weights.duration * capped_span / 60.0
            - weights.window * width_hours.ln()
            + if same_location { weights.same_location_bonus } else { 0.0 }
    }

    /// Appends the most window-compatible queued services to shift `h`
    /// until nothing else fits.
    fn extend(&mut self, h: usize, seed: usize, queue: &mut VecDeque<usize>) {
        let mut last = seed;
        while self.shifts[h].placements.len() < self.options.max_points_per_shift && !queue.is_empty() {
            let last_window = self.entries[last].service.time_window;
            let day = self.shifts[h].day;

            let mut ranked: Vec<(usize, i64)> = queue
                .iter()
                .enumerate()
                .filter(|&(_, &j)| self.entries[j].service.day() == day)
                .map(|(pos, &j)| (pos, last_window.overlap_minutes(&self.entries[j].service.time_window)))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

            let found = ranked
                .iter()
                .take(self.options.extension_candidate_limit)
                .find_map(|&(pos, _)| self.best_start_in(h, queue[pos]).map(|(start, _)| (pos, start)));

            let Some((pos, start)) = found else {
                break;
            };
            let Some(j) = queue.remove(pos) else {
                break;
            };
            self.insert(h, j, start);
            self.processed += 1;
            last = j;
        }
    }

    // ------------------------------------------------------------------
    // Merge pass
    // ------------------------------------------------------------------

    fn merge_pass(&mut self, cluster: Option<usize>) -> Result<()> {
        let group: Vec<usize> = (0..self.shifts.len())
            .filter(|&h| self.shifts[h].alive && self.shifts[h].cluster == cluster)
            .collect();

        let mut merges = 0usize;
        for later in (1..group.len()).rev() {
            self.ctx.checkpoint()?;
            self.ctx.report_band(0.9, 1.0, group.len() - later, group.len());

            let j = group[later];
            if !self.shifts[j].alive {
                continue;
            }
            let target = group[..later]
                .iter()
                .copied()
                .find(|&i| self.shifts[i].alive && self.can_merge(i, j));
            if let Some(i) = target {
                self.merge(i, j);
                merges += 1;
            }
        }

        if merges > 0 {
            debug!(?cluster, merges, "merge pass folded shifts");
        }
        Ok(())
    }

    fn can_merge(&self, i: usize, j: usize) -> bool {
        let (a, b) = (&self.shifts[i], &self.shifts[j]);
        let cap = self.options.max_points_per_shift;
        if a.day != b.day || a.placements.len() + b.placements.len() > cap {
            return false;
        }

        let pinned = |s: &ShiftState| s.placements.iter().any(|p| self.entries[p.service].service.enforced);
        if a.tech != b.tech && pinned(b) {
            return false;
        }

        let (Some((a_start, a_end)), Some((b_start, b_end))) = (a.span(), b.span()) else {
            return false;
        };
        let merged_span = a_end.max(b_end) - a_start.min(b_start);
        let max = self.options.max_shift_duration_minutes;
        if merged_span > minutes(max) {
            return false;
        }

        let comfortably_full = |s: &ShiftState| {
            s.placements.len() >= cap
                || s.span_length().num_seconds() as f64 >= self.options.merge_full_fraction * max as f64 * 60.0
        };
        let undersized = b.placements.len() < self.options.min_points;
        if !undersized
            && (comfortably_full(a) || comfortably_full(b))
            && merged_span > a.span_length().max(b.span_length())
        {
            return false;
        }

        for p in &a.placements {
            for q in &b.placements {
                if overlaps(p.start, p.end, q.start, q.end) || !self.pair_allowed(p.service, q.service) {
                    return false;
                }
            }
        }

        let mut merged: Vec<Placement> = a.placements.iter().chain(b.placements.iter()).copied().collect();
        merged.sort_by_key(|p| p.start);
        for pair in merged.windows(2) {
            let Some(miles) = self.distance(pair[0].service, pair[1].service) else {
                return false;
            };
            if minutes_between(pair[0].end, pair[1].start) < self.options.travel_minutes(miles) {
                return false;
            }
        }

        if a.tech != b.tech {
            return b
                .placements
                .iter()
                .all(|q| !self.tech_busy(a.tech, q.start, q.end, &[i, j]));
        }
        true
    }

    fn merge(&mut self, i: usize, j: usize) {
        let moved = std::mem::take(&mut self.shifts[j].placements);
        self.shifts[j].alive = false;
        let target = &mut self.shifts[i];
        target.placements.extend(moved);
        target.placements.sort_by_key(|p| p.start);
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn insert(&mut self, h: usize, i: usize, start: NaiveDateTime) {
        let end = end_time(start, self.entries[i].service.duration_minutes);
        let shift = &mut self.shifts[h];
        shift.placements.push(Placement { service: i, start, end });
        shift.placements.sort_by_key(|p| p.start);
    }

    fn open_shift(&mut self, tech: usize, cluster: Option<usize>, i: usize, start: NaiveDateTime) -> usize {
        let end = end_time(start, self.entries[i].service.duration_minutes);
        self.shifts.push(ShiftState {
            tech,
            cluster,
            day: self.entries[i].service.day(),
            placements: vec![Placement { service: i, start, end }],
            alive: true,
        });
        let h = self.shifts.len() - 1;
        debug!(
            shift = h,
            tech = %self.technicians[tech].id,
            service_id = %self.entries[i].service.id,
            seeded_at = %start,
            nominal_end = %end_time(start, self.options.shift_duration_minutes),
            "shift opened"
        );
        h
    }

    fn hire(&mut self) -> usize {
        let mut numbered = self.generated;
        let id = self.generated_name(&mut numbered);
        self.generated += 1;
        self.technicians.push(Technician { id, generated: true });
        self.technicians.len() - 1
    }

    /// Next `Tech N` after `*numbered` that no pinned service uses as its
    /// tech code.
    fn generated_name(&self, numbered: &mut usize) -> String {
        loop {
            *numbered += 1;
            let name = format!("Tech {}", numbered);
            if !self.tech_by_code.contains_key(&name) {
                return name;
            }
        }
    }

    fn tech_for_code(&mut self, code: &str) -> usize {
        if let Some(&tech) = self.tech_by_code.get(code) {
            return tech;
        }
        self.technicians.push(Technician {
            id: code.to_string(),
            generated: false,
        });
        let tech = self.technicians.len() - 1;
        self.tech_by_code.insert(code.to_string(), tech);
        tech
    }

    fn works_on(&self, tech: usize, day: NaiveDate) -> bool {
        self.shifts.iter().any(|s| s.alive && s.tech == tech && s.day == day)
    }

    /// Whether `tech` has a service overlapping `[start, end)` in any shift
    /// other than those in `except`.
    fn tech_busy(&self, tech: usize, start: NaiveDateTime, end: NaiveDateTime, except: &[usize]) -> bool {
        self.shifts.iter().enumerate().any(|(h, shift)| {
            shift.alive
                && shift.tech == tech
                && !except.contains(&h)
                && shift.placements.iter().any(|p| overlaps(start, end, p.start, p.end))
        })
    }

    fn distances_allowed(&self, h: usize, i: usize) -> bool {
        self.shifts[h].placements.iter().all(|p| self.pair_allowed(p.service, i))
    }

    /// Known distance within the radius that applies to the pair.
    fn pair_allowed(&self, a: usize, b: usize) -> bool {
        self.distance(a, b).is_some_and(|miles| miles <= self.radius_limit(a, b))
    }

    fn distance(&self, a: usize, b: usize) -> Option<f64> {
        let (left, right) = (&self.entries[a], &self.entries[b]);
        if left.service.location_id == right.service.location_id {
            return Some(0.0);
        }
        self.matrix.get_index(left.slot?, right.slot?)
    }

    fn radius_limit(&self, a: usize, b: usize) -> f64 {
        let hard = self.options.hard_max_radius_miles;
        if !self.options.enforce_boundaries {
            return hard;
        }
        let (left, right) = (&self.entries[a], &self.entries[b]);
        match (&left.borough, &right.borough) {
            (Some(x), Some(y)) if x != y => {
                let rules = &self.options.boroughs;
                let (wa, wb) = (left.service.time_window, right.service.time_window);
                let overlap = wa.overlap_minutes(&wb);
                let narrower = wa.width_minutes().min(wb.width_minutes());
                let fraction = if overlap < 0 {
                    0.0
                } else if narrower == 0 {
                    1.0
                } else {
                    overlap as f64 / narrower as f64
                };
                if fraction >= rules.relax_overlap_fraction {
                    rules.relaxed_radius_miles.min(hard)
                } else {
                    rules.max_radius_across_boroughs_miles.min(hard)
                }
            }
            _ => hard,
        }
    }
}

/// Closed-open interval overlap; touching endpoints do not conflict.
fn overlaps(a_start: NaiveDateTime, a_end: NaiveDateTime, b_start: NaiveDateTime, b_end: NaiveDateTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// `TimeDelta` of `m` minutes, saturating instead of panicking.
fn minutes(m: i64) -> TimeDelta {
    TimeDelta::try_minutes(m).unwrap_or(TimeDelta::MAX)
}

/// End of a visit starting at `start`; saturates at the calendar limit.
fn end_time(start: NaiveDateTime, duration_minutes: i64) -> NaiveDateTime {
    start
        .checked_add_signed(minutes(duration_minutes))
        .unwrap_or(NaiveDateTime::MAX)
}

fn minutes_between(from: NaiveDateTime, to: NaiveDateTime) -> f64 {
    (to - from).num_seconds() as f64 / 60.0
}
