use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use cs_ranging_core::config::RangingSettings;
use defmt_rtt as _;
use embassy_executor::Spawner;
use static_cell::StaticCell;

use crate::console::ConsoleChannel;
use crate::link::HciQueues;
use crate::ranging_task::{RangingTask, UnavailableEstimator};

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

/// Queues shared with the vendor HCI transport.
pub(crate) static HCI_QUEUES: HciQueues = HciQueues::new();
/// Lines from the operator console transport.
pub(crate) static CONSOLE_QUEUE: ConsoleChannel = ConsoleChannel::new();

static RANGING_TASK: StaticCell<RangingTask<'static, UnavailableEstimator>> = StaticCell::new();

#[embassy_executor::task]
async fn ranging(task: &'static mut RangingTask<'static, UnavailableEstimator>) -> ! {
    task.run().await
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let task = RANGING_TASK.init(RangingTask::new(
        RangingSettings::DEFAULT,
        UnavailableEstimator,
        &HCI_QUEUES,
        CONSOLE_QUEUE.receiver(),
    ));

    spawner.spawn(ranging(task).expect("failed to spawn ranging task"));

    core::future::pending::<()>().await;
}
