mod inheritance;
mod messaging;
mod overrun;
mod scheduling;
mod signals;
