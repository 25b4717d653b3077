use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use bevy::prelude::*;

/// Ticks of the server's logic loop per second.
pub const TICKS_PER_SECOND: u32 = 60;

pub type OneShotTask = Box<dyn FnOnce(&mut World) + Send + Sync>;
pub type RepeatingTask = Box<dyn FnMut(&mut World) -> TaskControl + Send + Sync>;

/// Returned by a repeating task to keep or cancel its registration.
/// Stopping is a transition made by the task itself, checked before any
/// later tick can run it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskControl {
    Continue,
    Stop,
}

/// Defers work to later ticks of the single logic thread.
///
/// There is no parallelism here, only temporal deferral: callbacks run on
/// the logic thread in tick order, never before their requested delay.
pub trait Scheduler: Send + Sync {
    /// Runs the task once, `delay_ticks` ticks from now.
    fn schedule(&self, delay_ticks: u32, task: OneShotTask);

    /// Runs the task every `interval_ticks` ticks until it returns
    /// [`TaskControl::Stop`] or the handle is cancelled. No callback fires
    /// after cancellation.
    fn schedule_repeating(&self, interval_ticks: u32, task: RepeatingTask) -> TaskHandle;
}

/// Cancellation token for a repeating registration.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    cancelled: Arc<AtomicBool>,
}

impl TaskHandle {
    fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

enum TaskKind {
    // Option so the task can be taken out of a &mut borrow when it runs.
    Once(Option<OneShotTask>),
    Repeating { interval: u32, task: RepeatingTask },
}

struct ScheduledTask {
    due: u64,
    kind: TaskKind,
    cancelled: Arc<AtomicBool>,
}

#[derive(Default)]
struct TaskQueue {
    tick: u64,
    tasks: Vec<ScheduledTask>,
}

/// The game's task scheduler, driven once per `Update` by
/// [`run_scheduled_tasks`].
///
/// Clones share the same queue, so effects hold on to a clone while the
/// resource stays in the world. Tasks due on the same tick run in
/// registration order, and a task scheduled from within a task never runs
/// before the next tick.
#[derive(Resource, Clone, Default)]
pub struct TickScheduler {
    queue: Arc<Mutex<TaskQueue>>,
}

impl TickScheduler {
    pub fn current_tick(&self) -> u64 {
        self.queue.lock().unwrap().tick
    }

    /// Advances one tick and runs everything that came due. The queue lock
    /// is not held while tasks run, so tasks are free to schedule more
    /// tasks.
    pub fn advance(&self, world: &mut World) {
        let mut due_tasks = Vec::new();
        {
            let mut queue = self.queue.lock().unwrap();
            queue.tick += 1;
            let tick = queue.tick;
            let mut index = 0;
            while index < queue.tasks.len() {
                if queue.tasks[index].due <= tick {
                    due_tasks.push(queue.tasks.remove(index));
                } else {
                    index += 1;
                }
            }
        }

        for mut scheduled in due_tasks {
            if scheduled.cancelled.load(Ordering::Relaxed) {
                continue;
            }

            match &mut scheduled.kind {
                TaskKind::Once(task) => {
                    if let Some(task) = task.take() {
                        task(world);
                    }
                }
                TaskKind::Repeating { interval, task } => {
                    if task(world) == TaskControl::Stop {
                        scheduled.cancelled.store(true, Ordering::Relaxed);
                        continue;
                    }
                    if scheduled.cancelled.load(Ordering::Relaxed) {
                        continue;
                    }
                    let mut queue = self.queue.lock().unwrap();
                    scheduled.due = queue.tick + *interval as u64;
                    queue.tasks.push(scheduled);
                }
            }
        }
    }
}

impl Scheduler for TickScheduler {
    fn schedule(&self, delay_ticks: u32, task: OneShotTask) {
        let mut queue = self.queue.lock().unwrap();
        let due = queue.tick + delay_ticks as u64;
        queue.tasks.push(ScheduledTask {
            due,
            kind: TaskKind::Once(Some(task)),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
    }

    fn schedule_repeating(&self, interval_ticks: u32, task: RepeatingTask) -> TaskHandle {
        let interval = interval_ticks.max(1);
        let handle = TaskHandle::new();
        let mut queue = self.queue.lock().unwrap();
        let due = queue.tick + interval as u64;
        queue.tasks.push(ScheduledTask {
            due,
            kind: TaskKind::Repeating { interval, task },
            cancelled: handle.cancelled.clone(),
        });
        return handle;
    }
}

pub fn run_scheduled_tasks(world: &mut World) {
    let scheduler = world.resource::<TickScheduler>().clone();
    scheduler.advance(world);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> Arc<Mutex<Vec<u64>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn one_shot_runs_on_the_due_tick() {
        let mut world = World::new();
        let scheduler = TickScheduler::default();
        let runs = counter();

        let seen = runs.clone();
        let inner = scheduler.clone();
        scheduler.schedule(
            3,
            Box::new(move |_| seen.lock().unwrap().push(inner.current_tick())),
        );

        for _ in 0..5 {
            scheduler.advance(&mut world);
        }
        assert_eq!(*runs.lock().unwrap(), vec![3]);
    }

    #[test]
    fn repeating_runs_every_interval_until_stopped() {
        let mut world = World::new();
        let scheduler = TickScheduler::default();
        let runs = counter();

        let seen = runs.clone();
        let inner = scheduler.clone();
        scheduler.schedule_repeating(
            2,
            Box::new(move |_| {
                seen.lock().unwrap().push(inner.current_tick());
                if seen.lock().unwrap().len() == 3 {
                    TaskControl::Stop
                } else {
                    TaskControl::Continue
                }
            }),
        );

        for _ in 0..20 {
            scheduler.advance(&mut world);
        }
        assert_eq!(*runs.lock().unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn cancelled_tasks_never_run() {
        let mut world = World::new();
        let scheduler = TickScheduler::default();
        let runs = counter();

        let seen = runs.clone();
        let handle = scheduler.schedule_repeating(
            1,
            Box::new(move |_| {
                seen.lock().unwrap().push(0);
                TaskControl::Continue
            }),
        );

        handle.cancel();
        for _ in 0..5 {
            scheduler.advance(&mut world);
        }
        assert!(runs.lock().unwrap().is_empty());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn same_tick_tasks_run_in_registration_order() {
        let mut world = World::new();
        let scheduler = TickScheduler::default();
        let runs = counter();

        for id in 0..4 {
            let seen = runs.clone();
            scheduler.schedule(1, Box::new(move |_| seen.lock().unwrap().push(id)));
        }

        scheduler.advance(&mut world);
        assert_eq!(*runs.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn tasks_scheduled_by_tasks_wait_for_the_next_tick() {
        let mut world = World::new();
        let scheduler = TickScheduler::default();
        let runs = counter();

        let seen = runs.clone();
        let inner = scheduler.clone();
        scheduler.schedule(
            1,
            Box::new(move |_| {
                let seen_inner = seen.clone();
                let tick_source = inner.clone();
                seen.lock().unwrap().push(inner.current_tick());
                inner.schedule(
                    0,
                    Box::new(move |_| {
                        seen_inner.lock().unwrap().push(tick_source.current_tick())
                    }),
                );
            }),
        );

        scheduler.advance(&mut world);
        assert_eq!(*runs.lock().unwrap(), vec![1]);
        scheduler.advance(&mut world);
        assert_eq!(*runs.lock().unwrap(), vec![1, 2]);
    }
}
