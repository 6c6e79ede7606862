use state_machines::state_machine;

state_machine! {
    name: IngestionMachine,
    state: IngestionState,
    initial: Ready,
    states: [Ready, Split, Embedded, Tagged, Persisted, Failed],
    events {
        split { transition: { from: Ready, to: Split } }
        embed { transition: { from: Split, to: Embedded } }
        tag { transition: { from: Embedded, to: Tagged } }
        persist { transition: { from: Tagged, to: Persisted } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: Split, to: Failed }
            transition: { from: Embedded, to: Failed }
            transition: { from: Tagged, to: Failed }
            transition: { from: Persisted, to: Failed }
        }
    }
}

pub fn ready() -> IngestionMachine<(), Ready> {
    IngestionMachine::new(())
}
