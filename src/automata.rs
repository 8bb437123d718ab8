// LNP Node: node running lightning network protocol and generalized lightning
// channels.
// Written in 2020-2022 by
//     Dr. Maxim Orlovsky <orlovsky@lnp-bp.org>
//
// To the extent possible under law, the author(s) have dedicated all
// copyright and related and neighboring rights to this software to
// the public domain worldwide. This software is distributed without
// any warranty.
//
// You should have received a copy of the MIT License along with this software.
// If not, see <https://opensource.org/licenses/MIT>.

//! State machines help to organize complex asynchronous workflows. Here they
//! never perform I/O: a state machine consumes an event and tells the runtime
//! which actions it has to perform.

/// Pure state machine. Processing an event produces the next machine value
/// and the actions for the runtime; the original value is left intact, so
/// the runtime may persist or discard either of them.
pub trait StateMachine: Sized {
    /// Input of the state machine
    type Event;

    /// Side effect requested from the runtime
    type Action;

    /// Moves state machine to a next step in response to the provided event
    fn process(&self, event: Self::Event) -> (Self, Vec<Self::Action>);

    /// Processes series of events, collecting actions of every step
    fn process_all(
        &self,
        events: impl IntoIterator<Item = Self::Event>,
    ) -> (Self, Vec<Self::Action>)
    where
        Self: Clone,
    {
        events.into_iter().fold((self.clone(), vec![]), |(machine, mut actions), event| {
            let (next, step) = machine.process(event);
            actions.extend(step);
            (next, actions)
        })
    }
}
