use log::info;

use crate::configuration::DISPLAY_REFRESH_INTERVAL;
use crate::display::DisplayBoard;

mod periodic_timer;
use periodic_timer::PeriodicTimer;

pub struct CronJobs {
    jobs: Vec<PeriodicTimer>,
}

impl CronJobs {

    pub fn new() -> CronJobs {
        CronJobs {
            jobs: Vec::new(),
        }
    }

    pub fn start(&mut self, board: DisplayBoard) {
        let mut refresh_job = PeriodicTimer::new(
            "Display Refresh".into(),
            DISPLAY_REFRESH_INTERVAL,
            Box::new(move || board.render()),
        );
        refresh_job.start();
        self.jobs.push(refresh_job);

        info!("Cron jobs started.");
    }

    pub fn stop(&mut self) {
        for job in self.jobs.iter_mut() {
            job.stop();
        }
    }
}
