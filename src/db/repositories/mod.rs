mod patients;
mod readings;
