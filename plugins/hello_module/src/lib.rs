use trinity_module_sdk::{debug, export_module, imports, info, HelpText, Message, TrinityModule};

static HELP: &str = "Greets everyone who talks in the room.";

pub struct Hello;

impl TrinityModule for Hello {
    fn init() {
        info!("hello module ready (instance {:016x})", imports::rand_u64());
    }

    fn help(topic: Option<&str>) -> HelpText {
        match topic {
            None => HELP.into(),
            Some(topic) => {
                format!("hello has no help about {topic}; try !help hello").into()
            }
        }
    }

    fn admin(cmd: &str, _author_id: &str) -> Vec<Message> {
        debug!("ignoring admin command {:?}", cmd);
        Vec::new()
    }

    fn on_msg(_content: &str, author_id: &str, _author_name: &str, _room: &str) -> Vec<Message> {
        vec![Message::new(format!("Hello, {author_id}!"), author_id)]
    }
}

export_module!(Hello);
