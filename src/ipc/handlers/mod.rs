pub mod attendance;
pub mod backup;
pub mod classes;
pub mod core;
pub mod notices;
pub mod results;
pub mod staff;
pub mod students;
pub mod subjects;
pub mod timetable;
