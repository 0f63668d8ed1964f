mod messaging_steps;
mod session_steps;
